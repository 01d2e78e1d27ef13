//! # Command-Line Interface Module
//!
//! Argument parsing and the transformation from user-facing flags to the
//! internal [`RunConfig`] the orchestration engine consumes. Parsing uses
//! the `clap` derive API; everything that can be validated up front
//! (implementation names, test names, image overrides) is validated here so
//! the engine only ever sees a consistent configuration.
//!
//! ## Usage Examples
//!
//! ```bash
//! # Full matrix with every registered implementation
//! quic-interop-runner
//!
//! # One pair, tests only, matrix as Markdown
//! quic-interop-runner -s quic-go -c ngtcp2 -t onlyTests -m
//!
//! # Selected tests against a locally built image
//! quic-interop-runner -t handshake,transfer -r quic-go=local/quic-go:dev
//! ```

use crate::implementations::{
    apply_image_overrides, client_implementations, load_registry, server_implementations, Registry,
};
use crate::testcases::{find_measurement, find_test, MeasurementFactory, TestFactory};
use anyhow::{bail, Result};
use clap::builder::styling::{AnsiColor, Styles};
use clap::Parser;
use std::collections::HashSet;
use std::path::PathBuf;

/// Sentinel selecting all tests and no measurements.
const ONLY_TESTS: &str = "onlyTests";
/// Sentinel selecting all measurements and no tests.
const ONLY_MEASUREMENTS: &str = "onlyMeasurements";

fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct Args {
    /// Turn on debug logs
    #[arg(short, long)]
    pub debug: bool,

    /// Server implementations (comma-separated; default: all that can serve)
    #[arg(short, long, help_heading = "Matrix Selection")]
    pub server: Option<String>,

    /// Client implementations (comma-separated; default: all that can connect)
    #[arg(short, long, help_heading = "Matrix Selection")]
    pub client: Option<String>,

    /// Tests and measurements to run (comma-separated names, or the
    /// sentinels "onlyTests" / "onlyMeasurements")
    #[arg(short, long, help_heading = "Matrix Selection")]
    pub test: Option<String>,

    /// Only run pairs that include this implementation
    #[arg(long, help_heading = "Matrix Selection")]
    pub must_include: Option<String>,

    /// Replace implementation images, e.g. quic-go=local/quic-go:dev
    /// (comma-separated pairs)
    #[arg(short, long)]
    pub replace: Option<String>,

    /// Implementation registry file
    #[arg(short, long, default_value = "implementations.json")]
    pub implementations: PathBuf,

    /// Directory for the per-run log tree (default: logs_<timestamp>)
    #[arg(short, long, help_heading = "Output and Logging")]
    pub log_dir: Option<PathBuf>,

    /// Also preserve the www and downloads directories of failed runs
    #[arg(short = 'f', long, help_heading = "Output and Logging")]
    pub save_files: bool,

    /// Write the matrix to this file in JSON format
    #[arg(short, long, help_heading = "Output and Logging")]
    pub json: Option<PathBuf>,

    /// Render the matrix as Markdown instead of a box-drawn table
    #[arg(short, long, help_heading = "Output and Logging")]
    pub markdown: bool,

    /// Implementations excluded from the auto-downgrade to unsupported
    /// (comma-separated)
    #[arg(long)]
    pub no_auto_unsupported: Option<String>,

    /// Number of test runs to execute in parallel (0 or less: all CPU cores)
    #[arg(short = 'p', long, default_value_t = 0)]
    pub parallel: i64,
}

/// Resolved configuration for one harness invocation.
#[derive(Debug)]
pub struct RunConfig {
    pub registry: Registry,
    pub servers: Vec<String>,
    pub clients: Vec<String>,
    pub tests: Vec<&'static TestFactory>,
    pub measurements: Vec<&'static MeasurementFactory>,
    pub log_dir: PathBuf,
    pub save_files: bool,
    pub json_path: Option<PathBuf>,
    pub markdown: bool,
    pub parallelism: usize,
    pub must_include: Option<String>,
    pub no_auto_unsupported: HashSet<String>,
}

impl RunConfig {
    /// Validate the arguments against the registry and the test tables.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut registry = load_registry(&args.implementations)?;
        if let Some(overrides) = &args.replace {
            apply_image_overrides(&mut registry, overrides)?;
        }

        let servers = select_implementations(
            args.server.as_deref(),
            &server_implementations(&registry),
            "Server",
        )?;
        let clients = select_implementations(
            args.client.as_deref(),
            &client_implementations(&registry),
            "Client",
        )?;
        if let Some(required) = &args.must_include {
            if !registry.contains_key(required) {
                bail!("implementation {:?} not found in the registry", required);
            }
        }

        let (tests, measurements) = select_tests(args.test.as_deref())?;

        let log_dir = match &args.log_dir {
            Some(dir) => dir.clone(),
            None => PathBuf::from(format!(
                "logs_{}",
                chrono::Local::now().format("%Y-%m-%dT%H-%M-%S")
            )),
        };

        Ok(Self {
            registry,
            servers,
            clients,
            tests,
            measurements,
            log_dir,
            save_files: args.save_files,
            json_path: args.json.clone(),
            markdown: args.markdown,
            parallelism: parallelism(args.parallel),
            must_include: args.must_include.clone(),
            no_auto_unsupported: args
                .no_auto_unsupported
                .as_deref()
                .map(|list| list.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
        })
    }
}

/// Resolve the worker pool size; values of zero or less select all cores.
pub fn parallelism(requested: i64) -> usize {
    if requested <= 0 {
        num_cpus::get()
    } else {
        requested as usize
    }
}

/// Pick implementations from `available`, or all of them when unselected.
pub fn select_implementations(
    arg: Option<&str>,
    available: &[String],
    role: &str,
) -> Result<Vec<String>> {
    let Some(arg) = arg else {
        return Ok(available.to_vec());
    };
    let mut selected = Vec::new();
    for name in arg.split(',').filter(|s| !s.is_empty()) {
        if !available.iter().any(|a| a == name) {
            bail!("{} implementation {:?} not found", role, name);
        }
        selected.push(name.to_string());
    }
    Ok(selected)
}

/// Resolve the test selection, honoring the two sentinels.
///
/// With no selection, all tests and all measurements run. An empty
/// selection runs nothing at all.
pub fn select_tests(
    arg: Option<&str>,
) -> Result<(Vec<&'static TestFactory>, Vec<&'static MeasurementFactory>)> {
    let Some(arg) = arg else {
        return Ok((
            crate::testcases::TESTCASES.iter().collect(),
            crate::testcases::MEASUREMENTS.iter().collect(),
        ));
    };

    let mut tests = Vec::new();
    let mut measurements = Vec::new();
    for entry in arg.split(',').filter(|s| !s.is_empty()) {
        match entry {
            ONLY_TESTS => tests.extend(crate::testcases::TESTCASES.iter()),
            ONLY_MEASUREMENTS => measurements.extend(crate::testcases::MEASUREMENTS.iter()),
            name => {
                if let Some(test) = find_test(name) {
                    tests.push(test);
                } else if let Some(measurement) = find_measurement(name) {
                    measurements.push(measurement);
                } else {
                    bail!("test case {:?} not found", name);
                }
            }
        }
    }
    Ok((tests, measurements))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_selection_runs_everything() {
        let (tests, measurements) = select_tests(None).unwrap();
        assert_eq!(tests.len(), crate::testcases::TESTCASES.len());
        assert_eq!(measurements.len(), crate::testcases::MEASUREMENTS.len());
    }

    #[test]
    fn empty_selection_runs_nothing() {
        let (tests, measurements) = select_tests(Some("")).unwrap();
        assert!(tests.is_empty());
        assert!(measurements.is_empty());
    }

    #[test]
    fn sentinels_select_whole_groups() {
        let (tests, measurements) = select_tests(Some("onlyTests")).unwrap();
        assert_eq!(tests.len(), crate::testcases::TESTCASES.len());
        assert!(measurements.is_empty());

        let (tests, measurements) = select_tests(Some("onlyMeasurements")).unwrap();
        assert!(tests.is_empty());
        assert_eq!(measurements.len(), crate::testcases::MEASUREMENTS.len());
    }

    #[test]
    fn named_selection_mixes_tests_and_measurements() {
        let (tests, measurements) = select_tests(Some("handshake,goodput,retry")).unwrap();
        let names: Vec<&str> = tests.iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["handshake", "retry"]);
        assert_eq!(measurements.len(), 1);
        assert_eq!(measurements[0].name, "goodput");
    }

    #[test]
    fn unknown_test_names_are_fatal() {
        assert!(select_tests(Some("nosuchtest")).is_err());
    }

    #[test]
    fn implementation_selection_validates_names() {
        let available = vec!["quic-go".to_string(), "ngtcp2".to_string()];
        assert_eq!(
            select_implementations(None, &available, "Server").unwrap(),
            available
        );
        assert_eq!(
            select_implementations(Some("ngtcp2"), &available, "Server").unwrap(),
            vec!["ngtcp2"]
        );
        assert!(select_implementations(Some("quiche"), &available, "Server").is_err());
    }

    #[test]
    fn parallelism_defaults_to_all_cores() {
        assert_eq!(parallelism(0), num_cpus::get());
        assert_eq!(parallelism(-3), num_cpus::get());
        assert_eq!(parallelism(4), 4);
    }
}
