//! # Test Verdict Types
//!
//! Every matrix cell holds exactly one of three verdicts. `succeeded` and
//! `failed` are terminal outcomes that cause the run's logs to be promoted
//! into the persistent log tree; `unsupported` means the implementation
//! signalled that it does not know the test case (exit code 127) and leaves
//! no logs behind.
//!
//! Measurements carry an additional human-readable `details` string that is
//! only populated on success.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a single test run.
///
/// Comparison is by identity; there is no ordering between the variants.
/// The serialized form uses the lowercase strings `"succeeded"`, `"failed"`
/// and `"unsupported"`, which is also the format of the JSON report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestResult {
    Succeeded,
    Failed,
    Unsupported,
}

impl TestResult {
    /// One-character symbol used in the rendered matrix.
    pub fn symbol(&self) -> &'static str {
        match self {
            TestResult::Succeeded => "✓",
            TestResult::Failed => "✕",
            TestResult::Unsupported => "?",
        }
    }

    /// The lowercase wire string, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TestResult::Succeeded => "succeeded",
            TestResult::Failed => "failed",
            TestResult::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated outcome of a measurement over all of its repetitions.
///
/// `details` is empty unless `result` is [`TestResult::Succeeded`], in which
/// case it encodes `"<mean> (± <stdev>) <unit>"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementResult {
    pub result: TestResult,
    pub details: String,
}

impl MeasurementResult {
    /// A non-successful measurement outcome with no detail string.
    pub fn without_details(result: TestResult) -> Self {
        Self {
            result,
            details: String::new(),
        }
    }
}
