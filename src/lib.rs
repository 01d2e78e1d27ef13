//! # QUIC Interop Runner
//!
//! An interoperability and performance test harness for QUIC
//! implementations. Implementations are packaged as container images; the
//! harness pairs them up as clients and servers, subjects each pair to a
//! catalogue of scripted network scenarios, and classifies every run as
//! succeeded, failed or unsupported.

pub mod cli;
pub mod docker;
pub mod implementations;
pub mod interop;
pub mod logging;
pub mod report;
pub mod result;
pub mod subnet;
pub mod testcase;
pub mod testcases;
pub mod trace;
pub mod utils;
pub mod workspace;

pub use cli::{Args, RunConfig};
pub use implementations::{Implementation, Registry, Role};
pub use interop::{InteropRunner, Matrix};
pub use result::{MeasurementResult, TestResult};
pub use subnet::{AddressBundle, SubnetAllocator};

/// The current version of the interop runner
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Delay between test submissions to the worker pool, so concurrent
    /// group startups do not stampede the container runtime.
    pub const SUBMISSION_STAGGER: Duration = Duration::from_millis(200);

    /// Grace period for the compose `stop` issued after a run times out.
    pub const TIMEOUT_STOP_GRACE: Duration = Duration::from_secs(60);
}
