//! # Test Case Interface
//!
//! A test case advertises its capability set (wire names, simulator
//! scenario, timeout, request paths, extra environment and containers) and
//! owns the check logic that turns a finished container run into a verdict.
//! Measurements are test cases that additionally yield a numeric sample per
//! successful run.
//!
//! Test cases are factories: the executor constructs a fresh instance for
//! every run and hands it a [`TestContext`] describing that run's workspace
//! paths, keylog locations and address plan. All shared machinery (file
//! generation, download verification, keylog discovery, handshake counting)
//! lives on the context so concrete test cases stay small.

use crate::logging::RunLog;
use crate::result::TestResult;
use crate::subnet::AddressBundle;
use crate::trace::{normalize_version, Direction, TraceAnalyzer};
use anyhow::Result;
use rand::RngCore;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// The QUIC version every test expects on the wire.
pub const QUIC_VERSION: &str = "0x1";

/// Default simulator scenario.
pub const DEFAULT_SCENARIO: &str = "simple-p2p --delay=15ms --bandwidth=10Mbps --queue=25";

/// Default per-run timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default URL prefix for client requests.
pub const DEFAULT_URL_PREFIX: &str = "https://server4:443/";

/// The two endpoint roles a wire test name can be addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Perspective {
    Client,
    Server,
}

/// Everything a test case instance knows about its run.
#[derive(Debug, Clone)]
pub struct TestContext {
    pub www_dir: PathBuf,
    pub download_dir: PathBuf,
    pub certs_dir: PathBuf,
    pub sim_log_dir: PathBuf,
    pub client_keylog: PathBuf,
    pub server_keylog: PathBuf,
    pub addrs: AddressBundle,
    pub log: Arc<RunLog>,
}

impl TestContext {
    /// Write a file of `size` random bytes into `www/` and return its name.
    pub fn generate_random_file(&self, size: usize) -> Result<String> {
        let name = crate::utils::random_string(10);
        let mut remaining = size;
        let mut rng = rand::thread_rng();
        let mut chunk = vec![0u8; 64 * 1024];
        let mut data = Vec::with_capacity(size);
        while remaining > 0 {
            let n = remaining.min(chunk.len());
            rng.fill_bytes(&mut chunk[..n]);
            data.extend_from_slice(&chunk[..n]);
            remaining -= n;
        }
        fs::write(self.www_dir.join(&name), data)?;
        self.log
            .debug(format!("Generated random file: {} of size: {}", name, size));
        Ok(name)
    }

    /// The usable TLS keylog for this run, preferring the client's file.
    ///
    /// A keylog is usable when it exists, is non-empty and starts lines with
    /// `SERVER_HANDSHAKE_TRAFFIC_SECRET`.
    pub fn keylog_file(&self) -> Option<PathBuf> {
        if self.is_valid_keylog(&self.client_keylog) {
            self.log.debug("Using the client's key log file.");
            return Some(self.client_keylog.clone());
        }
        if self.is_valid_keylog(&self.server_keylog) {
            self.log.debug("Using the server's key log file.");
            return Some(self.server_keylog.clone());
        }
        self.log.debug("No key log file found.");
        None
    }

    fn is_valid_keylog(&self, path: &Path) -> bool {
        let Ok(contents) = fs::read_to_string(path) else {
            return false;
        };
        if contents.is_empty() {
            return false;
        }
        if !contents
            .lines()
            .any(|line| line.starts_with("SERVER_HANDSHAKE_TRAFFIC_SECRET"))
        {
            self.log.info(format!(
                "Key log file {} is using incorrect format.",
                path.display()
            ));
            return false;
        }
        true
    }

    /// Trace recorded on the client side of the simulator.
    pub fn client_trace(&self) -> TraceAnalyzer {
        TraceAnalyzer::new(
            self.sim_log_dir.join("trace_node_left.pcap"),
            self.keylog_file(),
            self.addrs.clone(),
        )
    }

    /// Trace recorded on the server side of the simulator.
    pub fn server_trace(&self) -> TraceAnalyzer {
        TraceAnalyzer::new(
            self.sim_log_dir.join("trace_node_right.pcap"),
            self.keylog_file(),
            self.addrs.clone(),
        )
    }

    /// Count handshakes by the number of distinct source connection IDs on
    /// server Initial packets.
    pub fn count_handshakes(&self) -> Result<usize> {
        let initials = self.server_trace().initials(Direction::FromServer)?;
        let scids: HashSet<_> = initials.into_iter().filter_map(|p| p.scid).collect();
        Ok(scids.len())
    }

    /// Distinct normalized QUIC versions on server Initial packets.
    pub fn versions(&self) -> Result<HashSet<String>> {
        let initials = self.server_trace().initials(Direction::FromServer)?;
        Ok(initials
            .into_iter()
            .filter_map(|p| p.version)
            .filter_map(|v| normalize_version(&v))
            .collect())
    }

    /// Whether the server sent any Retry packet.
    pub fn retry_sent(&self) -> Result<bool> {
        Ok(!self.client_trace().retries(Direction::FromServer)?.is_empty())
    }

    /// Verify that exactly the expected number of handshakes happened.
    pub fn check_handshake_count(&self, expected: usize) -> bool {
        match self.count_handshakes() {
            Ok(n) if n == expected => true,
            Ok(n) => {
                self.log.info(format!(
                    "Expected exactly {} handshake(s). Got: {}",
                    expected, n
                ));
                false
            }
            Err(e) => {
                self.log
                    .info(format!("Could not count handshakes: {:#}", e));
                false
            }
        }
    }

    /// Verify the wire version and the downloaded files in one step.
    pub fn check_version_and_files(&self, files: &[String]) -> TestResult {
        let versions = match self.versions() {
            Ok(v) => v,
            Err(e) => {
                self.log.info(format!("Could not read versions: {:#}", e));
                return TestResult::Failed;
            }
        };
        if versions.len() != 1 {
            self.log
                .info(format!("Expected exactly one version. Got {:?}", versions));
            return TestResult::Failed;
        }
        if !versions.contains(QUIC_VERSION) {
            self.log.info(format!(
                "Wrong version. Expected {}, got {:?}",
                QUIC_VERSION, versions
            ));
            return TestResult::Failed;
        }
        self.check_files(files)
    }

    /// Verify that the client downloaded exactly the served files, byte for
    /// byte. Any I/O problem during verification downgrades to `failed`.
    pub fn check_files(&self, files: &[String]) -> TestResult {
        if files.is_empty() {
            self.log.error("No test files generated.");
            return TestResult::Failed;
        }

        let downloaded: Vec<String> = match fs::read_dir(&self.download_dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(e) => {
                self.log
                    .info(format!("Could not list downloaded files: {}", e));
                return TestResult::Failed;
            }
        };

        let too_many: Vec<_> = downloaded
            .iter()
            .filter(|f| !files.contains(*f))
            .collect();
        if !too_many.is_empty() {
            self.log
                .info(format!("Found unexpected downloaded files: {:?}", too_many));
        }
        let too_few: Vec<_> = files
            .iter()
            .filter(|f| !downloaded.contains(*f))
            .collect();
        if !too_few.is_empty() {
            self.log.info(format!("Missing files: {:?}", too_few));
        }
        if !too_many.is_empty() || !too_few.is_empty() {
            return TestResult::Failed;
        }

        for name in files {
            let served = self.www_dir.join(name);
            let fetched = self.download_dir.join(name);
            match (fs::read(&served), fs::read(&fetched)) {
                (Ok(expected), Ok(actual)) => {
                    if expected.len() != actual.len() {
                        self.log.info(format!(
                            "File size of {} doesn't match. Original: {} bytes, downloaded: {} bytes.",
                            fetched.display(),
                            expected.len(),
                            actual.len()
                        ));
                        return TestResult::Failed;
                    }
                    if expected != actual {
                        self.log.info(format!(
                            "File contents of {} do not match.",
                            fetched.display()
                        ));
                        return TestResult::Failed;
                    }
                }
                (Err(e), _) | (_, Err(e)) => {
                    self.log.info(format!(
                        "Could not compare files {} and {}: {}",
                        served.display(),
                        fetched.display(),
                        e
                    ));
                    return TestResult::Failed;
                }
            }
        }
        self.log.debug("Check of downloaded files succeeded.");
        TestResult::Succeeded
    }
}

/// Capability set and check logic of one test case instance.
pub trait TestCase: Send {
    /// Stable name, used in output and log paths.
    fn name(&self) -> &'static str;

    /// Short abbreviation shown in matrix cells.
    fn abbreviation(&self) -> &'static str;

    /// One-line human description.
    fn desc(&self) -> &'static str;

    /// The test name presented to the endpoint images. A test may present
    /// a different name than its own, e.g. `multiplexing` runs the
    /// endpoints' `transfer` logic.
    fn testname(&self, perspective: Perspective) -> &'static str {
        let _ = perspective;
        self.name()
    }

    /// Scenario string for the network simulator.
    fn scenario(&self) -> &'static str {
        DEFAULT_SCENARIO
    }

    fn timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }

    fn url_prefix(&self) -> &'static str {
        DEFAULT_URL_PREFIX
    }

    /// Length of the generated certificate chain.
    fn cert_chain_length(&self) -> u32 {
        1
    }

    /// Extra environment entries for the container group.
    fn additional_envs(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Extra companion containers to start and tear down with the group.
    fn additional_containers(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Populate `www/` with the files the client will request and return
    /// the request path components.
    fn get_paths(&mut self) -> Result<Vec<String>>;

    /// Inspect downloads and traces, and produce the verdict.
    fn check(&mut self) -> TestResult;
}

/// A test case that yields a numeric sample after each successful run.
pub trait Measurement: TestCase {
    /// The sample produced by the last successful [`TestCase::check`].
    fn result(&self) -> f64;

    fn unit(&self) -> &'static str;

    fn repetitions(&self) -> usize;

    /// View the measurement as a plain test case, so the executor can run
    /// it through the shared run body.
    fn as_test_case(&mut self) -> &mut dyn TestCase;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A context over plain temp directories, without any containers.
    pub fn context(www: &std::path::Path, downloads: &std::path::Path) -> TestContext {
        TestContext {
            www_dir: www.to_path_buf(),
            download_dir: downloads.to_path_buf(),
            certs_dir: PathBuf::from("/tmp/certs-unused"),
            sim_log_dir: PathBuf::from("/tmp/sim-unused"),
            client_keylog: PathBuf::from("/tmp/keys-client-unused"),
            server_keylog: PathBuf::from("/tmp/keys-server-unused"),
            addrs: AddressBundle::new(0),
            log: Arc::new(RunLog::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_files_land_in_www() {
        let www = tempfile::tempdir().unwrap();
        let downloads = tempfile::tempdir().unwrap();
        let ctx = test_support::context(www.path(), downloads.path());

        let name = ctx.generate_random_file(2048).unwrap();
        let written = fs::read(www.path().join(&name)).unwrap();
        assert_eq!(written.len(), 2048);
    }

    #[test]
    fn check_files_succeeds_on_identical_trees() {
        let www = tempfile::tempdir().unwrap();
        let downloads = tempfile::tempdir().unwrap();
        let ctx = test_support::context(www.path(), downloads.path());

        let name = ctx.generate_random_file(512).unwrap();
        fs::copy(www.path().join(&name), downloads.path().join(&name)).unwrap();

        assert_eq!(ctx.check_files(&[name]), TestResult::Succeeded);
    }

    #[test]
    fn check_files_flags_missing_and_unexpected_downloads() {
        let www = tempfile::tempdir().unwrap();
        let downloads = tempfile::tempdir().unwrap();
        let ctx = test_support::context(www.path(), downloads.path());

        let name = ctx.generate_random_file(128).unwrap();
        // Nothing downloaded at all.
        assert_eq!(ctx.check_files(&[name.clone()]), TestResult::Failed);

        // The expected file plus a stray one.
        fs::copy(www.path().join(&name), downloads.path().join(&name)).unwrap();
        fs::write(downloads.path().join("stray"), b"x").unwrap();
        assert_eq!(ctx.check_files(&[name]), TestResult::Failed);
    }

    #[test]
    fn check_files_compares_contents() {
        let www = tempfile::tempdir().unwrap();
        let downloads = tempfile::tempdir().unwrap();
        let ctx = test_support::context(www.path(), downloads.path());

        let name = ctx.generate_random_file(128).unwrap();
        fs::write(downloads.path().join(&name), vec![0u8; 128]).unwrap();
        assert_eq!(ctx.check_files(&[name]), TestResult::Failed);
    }

    #[test]
    fn check_files_requires_generated_files() {
        let www = tempfile::tempdir().unwrap();
        let downloads = tempfile::tempdir().unwrap();
        let ctx = test_support::context(www.path(), downloads.path());
        assert_eq!(ctx.check_files(&[]), TestResult::Failed);
    }

    #[test]
    fn keylog_discovery_prefers_a_valid_client_file() {
        let www = tempfile::tempdir().unwrap();
        let downloads = tempfile::tempdir().unwrap();
        let logs = tempfile::tempdir().unwrap();
        let mut ctx = test_support::context(www.path(), downloads.path());
        ctx.client_keylog = logs.path().join("client_keys.log");
        ctx.server_keylog = logs.path().join("server_keys.log");

        // No keylogs at all.
        assert_eq!(ctx.keylog_file(), None);

        // A malformed client keylog is ignored, a valid server one wins.
        fs::write(&ctx.client_keylog, "CLIENT_RANDOM abc def\n").unwrap();
        fs::write(
            &ctx.server_keylog,
            "SERVER_HANDSHAKE_TRAFFIC_SECRET abc def\n",
        )
        .unwrap();
        assert_eq!(ctx.keylog_file(), Some(ctx.server_keylog.clone()));

        // A valid client keylog takes precedence.
        fs::write(
            &ctx.client_keylog,
            "SERVER_HANDSHAKE_TRAFFIC_SECRET abc def\n",
        )
        .unwrap();
        assert_eq!(ctx.keylog_file(), Some(ctx.client_keylog.clone()));
    }
}
