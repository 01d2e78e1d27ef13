//! # Reporter and Exporter
//!
//! Renders the verdict matrix for humans (a box-drawn console table, or
//! Markdown for pasting into issues) and exports the machine-readable JSON
//! report. Rendering is deterministic: the same matrix always produces the
//! same bytes, and two JSON exports differ only in their timestamps.

use crate::cli::RunConfig;
use crate::interop::Matrix;
use crate::result::TestResult;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// One rendered cell: lines of (plain, display) text. Widths are computed
/// over the plain variant so ANSI color codes never skew the layout.
struct Cell {
    lines: Vec<(String, String)>,
}

impl Cell {
    fn width(&self) -> usize {
        self.lines
            .iter()
            .map(|(plain, _)| plain.chars().count())
            .max()
            .unwrap_or(0)
    }
}

fn color_for(result: TestResult, text: &str) -> String {
    match result {
        TestResult::Succeeded => text.green().to_string(),
        TestResult::Unsupported => text.yellow().to_string(),
        TestResult::Failed => text.red().to_string(),
    }
}

fn test_cell(matrix: &Matrix, config: &RunConfig, server: &str, client: &str) -> Cell {
    let mut lines = Vec::with_capacity(3);
    for result in [
        TestResult::Succeeded,
        TestResult::Unsupported,
        TestResult::Failed,
    ] {
        let letters: String = config
            .tests
            .iter()
            .filter(|t| matrix.test(server, client, t.name) == Some(result))
            .map(|t| t.abbreviation)
            .collect();
        let text = if letters.is_empty() {
            "-".to_string()
        } else {
            letters
        };
        let display = if config.markdown {
            text.clone()
        } else {
            color_for(result, &text)
        };
        lines.push((text, display));
    }
    Cell { lines }
}

fn measurement_cell(matrix: &Matrix, config: &RunConfig, server: &str, client: &str) -> Cell {
    let mut lines = Vec::with_capacity(config.measurements.len());
    for factory in &config.measurements {
        let (text, result) = match matrix.measurement(server, client, factory.name) {
            Some(m) if m.result == TestResult::Succeeded => {
                (format!("{}: {}", factory.abbreviation, m.details), m.result)
            }
            Some(m) => (format!("{}: {}", factory.abbreviation, m.result), m.result),
            None => ("-".to_string(), TestResult::Unsupported),
        };
        let display = if config.markdown {
            text.clone()
        } else {
            color_for(result, &text)
        };
        lines.push((text, display));
    }
    Cell { lines }
}

/// Lay a grid of cells out as a box-drawn table.
fn render_plain(headers: &[String], rows: &[(String, Vec<Cell>)]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for (label, cells) in rows {
        widths[0] = widths[0].max(label.chars().count());
        for (i, cell) in cells.iter().enumerate() {
            widths[i + 1] = widths[i + 1].max(cell.width());
        }
    }

    let separator = {
        let mut line = String::from("+");
        for width in &widths {
            line.push_str(&"-".repeat(width + 2));
            line.push('+');
        }
        line
    };

    let pad = |text: &str, display: &str, width: usize| {
        format!(" {}{} ", display, " ".repeat(width - text.chars().count()))
    };

    let mut out = String::new();
    out.push_str(&separator);
    out.push('\n');
    out.push('|');
    for (header, width) in headers.iter().zip(&widths) {
        out.push_str(&pad(header, header, *width));
        out.push('|');
    }
    out.push('\n');
    out.push_str(&separator);
    out.push('\n');

    for (label, cells) in rows {
        let height = cells.iter().map(|c| c.lines.len()).max().unwrap_or(1);
        for line_idx in 0..height {
            out.push('|');
            let label_text = if line_idx == 0 { label.as_str() } else { "" };
            out.push_str(&pad(label_text, label_text, widths[0]));
            out.push('|');
            for (cell, width) in cells.iter().zip(widths.iter().skip(1)) {
                let (plain, display) = cell
                    .lines
                    .get(line_idx)
                    .map(|(p, d)| (p.as_str(), d.as_str()))
                    .unwrap_or(("", ""));
                out.push_str(&pad(plain, display, *width));
                out.push('|');
            }
            out.push('\n');
        }
        out.push_str(&separator);
        out.push('\n');
    }
    out
}

/// Lay a grid of cells out as a Markdown table, joining multi-line cells
/// with `<br>`.
fn render_markdown(headers: &[String], rows: &[(String, Vec<Cell>)]) -> String {
    let mut out = String::new();
    out.push_str(&format!("| {} |\n", headers.join(" | ")));
    out.push_str(&format!(
        "|{}\n",
        " --- |".repeat(headers.len())
    ));
    for (label, cells) in rows {
        let mut row = vec![label.clone()];
        for cell in cells {
            row.push(
                cell.lines
                    .iter()
                    .map(|(plain, _)| plain.as_str())
                    .collect::<Vec<_>>()
                    .join("<br>"),
            );
        }
        out.push_str(&format!("| {} |\n", row.join(" | ")));
    }
    out
}

fn render_grid(
    config: &RunConfig,
    cell_fn: impl Fn(&str, &str) -> Cell,
) -> String {
    let mut headers = vec![String::new()];
    headers.extend(config.servers.iter().cloned());

    let rows: Vec<(String, Vec<Cell>)> = config
        .clients
        .iter()
        .map(|client| {
            let cells = config
                .servers
                .iter()
                .map(|server| cell_fn(server, client))
                .collect();
            (client.clone(), cells)
        })
        .collect();

    if config.markdown {
        render_markdown(&headers, &rows)
    } else {
        render_plain(&headers, &rows)
    }
}

/// Render the interop test matrix.
pub fn render_tests(matrix: &Matrix, config: &RunConfig) -> String {
    render_grid(config, |server, client| {
        test_cell(matrix, config, server, client)
    })
}

/// Render the measurement matrix.
pub fn render_measurements(matrix: &Matrix, config: &RunConfig) -> String {
    render_grid(config, |server, client| {
        measurement_cell(matrix, config, server, client)
    })
}

/// Print the rendered matrix (and measurements, when any ran) to stdout.
pub fn print_matrix(matrix: &Matrix, config: &RunConfig) {
    if !config.tests.is_empty() {
        println!("{}", render_tests(matrix, config));
    }
    if !config.measurements.is_empty() {
        println!("{}", render_measurements(matrix, config));
    }
}

#[derive(Debug, Serialize)]
pub struct TestDescription {
    pub name: String,
    pub desc: String,
}

#[derive(Debug, Serialize)]
pub struct TestResultEntry {
    pub abbr: String,
    pub result: TestResult,
}

#[derive(Debug, Serialize)]
pub struct MeasurementResultEntry {
    pub abbr: String,
    pub result: TestResult,
    pub details: String,
}

/// The machine-readable report, serialized to the `--json` file.
///
/// `results` and `measurements` hold one inner list per (server, client)
/// pair, in server-major order matching `servers` × `clients`. Pairs that
/// were skipped (compliance, `--must-include`) contribute empty lists.
#[derive(Debug, Serialize)]
pub struct JsonReport {
    pub start_time: i64,
    pub end_time: i64,
    pub log_dir: String,
    pub servers: Vec<String>,
    pub clients: Vec<String>,
    pub urls: BTreeMap<String, String>,
    pub tests: BTreeMap<String, TestDescription>,
    pub quic_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quic_draft: Option<u32>,
    pub results: Vec<Vec<TestResultEntry>>,
    pub measurements: Vec<Vec<MeasurementResultEntry>>,
}

/// Assemble the JSON report from the final matrix.
pub fn build_report(
    matrix: &Matrix,
    config: &RunConfig,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
) -> JsonReport {
    let mut urls = BTreeMap::new();
    for name in config.servers.iter().chain(config.clients.iter()) {
        if let Some(implementation) = config.registry.get(name) {
            urls.insert(name.clone(), implementation.url.clone());
        }
    }

    let mut tests = BTreeMap::new();
    for factory in &config.tests {
        tests.insert(
            factory.abbreviation.to_string(),
            TestDescription {
                name: factory.name.to_string(),
                desc: factory.desc.to_string(),
            },
        );
    }
    for factory in &config.measurements {
        tests.insert(
            factory.abbreviation.to_string(),
            TestDescription {
                name: factory.name.to_string(),
                desc: factory.desc.to_string(),
            },
        );
    }

    let mut results = Vec::new();
    let mut measurements = Vec::new();
    for server in &config.servers {
        for client in &config.clients {
            let mut pair_tests = Vec::new();
            for factory in &config.tests {
                if let Some(result) = matrix.test(server, client, factory.name) {
                    pair_tests.push(TestResultEntry {
                        abbr: factory.abbreviation.to_string(),
                        result,
                    });
                }
            }
            results.push(pair_tests);

            let mut pair_measurements = Vec::new();
            for factory in &config.measurements {
                if let Some(measurement) = matrix.measurement(server, client, factory.name) {
                    pair_measurements.push(MeasurementResultEntry {
                        abbr: factory.abbreviation.to_string(),
                        result: measurement.result,
                        details: measurement.details,
                    });
                }
            }
            measurements.push(pair_measurements);
        }
    }

    JsonReport {
        start_time: start_time.timestamp(),
        end_time: end_time.timestamp(),
        log_dir: config.log_dir.to_string_lossy().into_owned(),
        servers: config.servers.clone(),
        clients: config.clients.clone(),
        urls,
        tests,
        quic_version: crate::testcase::QUIC_VERSION.to_string(),
        quic_draft: None,
        results,
        measurements,
    }
}

/// Write the JSON report to `path`.
pub fn export_json(
    path: &Path,
    matrix: &Matrix,
    config: &RunConfig,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
) -> Result<()> {
    let report = build_report(matrix, config, start_time, end_time);
    let json = serde_json::to_string_pretty(&report).context("failed to serialize the report")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write the report to {}", path.display()))?;
    Ok(())
}
