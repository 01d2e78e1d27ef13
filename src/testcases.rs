//! # Test Case Registry
//!
//! The catalogue of interop tests and performance measurements. The tables
//! at the bottom of this module are the single source of truth for which
//! tests exist; the CLI, the scheduler and the reporter all iterate over
//! them. Each entry is a factory that builds a fresh test case instance
//! bound to one run's [`TestContext`].
//!
//! Most tests share the same shape (serve files, transfer them, count
//! handshakes, compare bytes) and are expressed as parameter tables over
//! [`TransferTest`]. Tests with their own trace logic (version negotiation,
//! retry, 0-RTT, ECN) get their own types.

use crate::result::TestResult;
use crate::testcase::{Measurement, Perspective, TestCase, TestContext, DEFAULT_SCENARIO};
use crate::trace::Direction;
use anyhow::Result;
use std::time::Duration;

const KB: usize = 1 << 10;
const MB: usize = 1 << 20;

/// How a test populates its `www/` directory.
#[derive(Debug, Clone, Copy)]
enum FilePlan {
    /// One file per listed size.
    Sizes(&'static [usize]),
    /// `count` files of `size` bytes each.
    Repeated { count: usize, size: usize },
}

impl FilePlan {
    fn generate(&self, ctx: &TestContext) -> Result<Vec<String>> {
        match self {
            FilePlan::Sizes(sizes) => sizes
                .iter()
                .map(|size| ctx.generate_random_file(*size))
                .collect(),
            FilePlan::Repeated { count, size } => (0..*count)
                .map(|_| ctx.generate_random_file(*size))
                .collect(),
        }
    }
}

/// Parameters of a plain transfer-shaped test.
struct TransferParams {
    name: &'static str,
    abbreviation: &'static str,
    desc: &'static str,
    testname: &'static str,
    scenario: &'static str,
    timeout_secs: u64,
    files: FilePlan,
    expected_handshakes: usize,
}

/// Serve files, let the client fetch them, verify version, handshake count
/// and byte-for-byte file contents.
struct TransferTest {
    ctx: TestContext,
    files: Vec<String>,
    params: &'static TransferParams,
}

impl TestCase for TransferTest {
    fn name(&self) -> &'static str {
        self.params.name
    }

    fn abbreviation(&self) -> &'static str {
        self.params.abbreviation
    }

    fn desc(&self) -> &'static str {
        self.params.desc
    }

    fn testname(&self, _perspective: Perspective) -> &'static str {
        self.params.testname
    }

    fn scenario(&self) -> &'static str {
        self.params.scenario
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.params.timeout_secs)
    }

    fn get_paths(&mut self) -> Result<Vec<String>> {
        self.files = self.params.files.generate(&self.ctx)?;
        Ok(self.files.clone())
    }

    fn check(&mut self) -> TestResult {
        if !self.ctx.check_handshake_count(self.params.expected_handshakes) {
            return TestResult::Failed;
        }
        self.ctx.check_version_and_files(&self.files)
    }
}

/// Elicit a Version Negotiation packet and verify the client acted on it.
struct VersionNegotiationTest {
    ctx: TestContext,
}

impl TestCase for VersionNegotiationTest {
    fn name(&self) -> &'static str {
        "versionnegotiation"
    }

    fn abbreviation(&self) -> &'static str {
        "V"
    }

    fn desc(&self) -> &'static str {
        "A version negotiation packet is elicited and acted on."
    }

    fn get_paths(&mut self) -> Result<Vec<String>> {
        Ok(vec![String::new()])
    }

    fn check(&mut self) -> TestResult {
        let trace = self.ctx.client_trace();
        let initials = match trace.initials(Direction::FromClient) {
            Ok(packets) => packets,
            Err(e) => {
                self.ctx.log.info(format!("Could not read Initials: {:#}", e));
                return TestResult::Failed;
            }
        };
        let Some(dcid) = initials.into_iter().find_map(|p| p.dcid) else {
            self.ctx.log.info("Didn't find an Initial / a DCID.");
            return TestResult::Failed;
        };
        match trace.version_negotiations() {
            Ok(vnps) if vnps.iter().any(|p| p.scid.as_deref() == Some(&dcid)) => {
                TestResult::Succeeded
            }
            Ok(_) => {
                self.ctx
                    .log
                    .info("Didn't find a Version Negotiation Packet with matching SCID.");
                TestResult::Failed
            }
            Err(e) => {
                self.ctx
                    .log
                    .info(format!("Could not read Version Negotiation packets: {:#}", e));
                TestResult::Failed
            }
        }
    }
}

/// A handshake that must complete in one round, without a Retry.
struct HandshakeTest {
    ctx: TestContext,
    files: Vec<String>,
}

impl TestCase for HandshakeTest {
    fn name(&self) -> &'static str {
        "handshake"
    }

    fn abbreviation(&self) -> &'static str {
        "H"
    }

    fn desc(&self) -> &'static str {
        "Handshake completes successfully."
    }

    fn get_paths(&mut self) -> Result<Vec<String>> {
        self.files = vec![self.ctx.generate_random_file(KB)?];
        Ok(self.files.clone())
    }

    fn check(&mut self) -> TestResult {
        if self.ctx.check_version_and_files(&self.files) != TestResult::Succeeded {
            return TestResult::Failed;
        }
        match self.ctx.retry_sent() {
            Ok(true) => {
                self.ctx.log.info("Didn't expect a Retry to be sent.");
                return TestResult::Failed;
            }
            Ok(false) => {}
            Err(e) => {
                self.ctx
                    .log
                    .info(format!("Could not check for Retry packets: {:#}", e));
                return TestResult::Failed;
            }
        }
        if !self.ctx.check_handshake_count(1) {
            return TestResult::Failed;
        }
        TestResult::Succeeded
    }
}

/// The server sends a Retry; the client must redo its Initial with the
/// token from the Retry packet.
struct RetryTest {
    ctx: TestContext,
    files: Vec<String>,
}

impl RetryTest {
    fn check_retry_token(&self) -> TestResult {
        let trace = self.ctx.client_trace();
        let retries = match trace.retries(Direction::FromServer) {
            Ok(packets) => packets,
            Err(e) => {
                self.ctx.log.info(format!("Could not read Retries: {:#}", e));
                return TestResult::Failed;
            }
        };
        let tokens: Vec<String> = retries
            .into_iter()
            .filter_map(|p| p.retry_token)
            .map(|t| t.replace(':', ""))
            .collect();
        if tokens.is_empty() {
            self.ctx.log.info("Didn't find any Retry packets.");
            return TestResult::Failed;
        }

        let initials = match trace.initials(Direction::FromClient) {
            Ok(packets) => packets,
            Err(e) => {
                self.ctx.log.info(format!("Could not read Initials: {:#}", e));
                return TestResult::Failed;
            }
        };
        for packet in initials {
            if packet.token_length.unwrap_or(0) == 0 {
                continue;
            }
            let Some(token) = packet.token.map(|t| t.replace(':', "")) else {
                continue;
            };
            if tokens.contains(&token) {
                self.ctx
                    .log
                    .debug(format!("Check of Retry succeeded. Token used: {}", token));
                return TestResult::Succeeded;
            }
        }
        self.ctx
            .log
            .info("Didn't find any Initial packet using a Retry token.");
        TestResult::Failed
    }
}

impl TestCase for RetryTest {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn abbreviation(&self) -> &'static str {
        "S"
    }

    fn desc(&self) -> &'static str {
        "Server sends a Retry, and a subsequent connection using the Retry token completes successfully."
    }

    fn get_paths(&mut self) -> Result<Vec<String>> {
        self.files = vec![self.ctx.generate_random_file(10 * KB)?];
        Ok(self.files.clone())
    }

    fn check(&mut self) -> TestResult {
        if !self.ctx.check_handshake_count(1) {
            return TestResult::Failed;
        }
        if self.ctx.check_version_and_files(&self.files) != TestResult::Succeeded {
            return TestResult::Failed;
        }
        self.check_retry_token()
    }
}

/// Resume a connection and send request data in 0-RTT packets.
struct ZeroRttTest {
    ctx: TestContext,
    files: Vec<String>,
}

impl TestCase for ZeroRttTest {
    fn name(&self) -> &'static str {
        "zerortt"
    }

    fn abbreviation(&self) -> &'static str {
        "Z"
    }

    fn desc(&self) -> &'static str {
        "0-RTT data is being sent and acted on."
    }

    fn get_paths(&mut self) -> Result<Vec<String>> {
        self.files = vec![
            self.ctx.generate_random_file(5 * KB)?,
            self.ctx.generate_random_file(10 * KB)?,
        ];
        Ok(self.files.clone())
    }

    fn check(&mut self) -> TestResult {
        if !self.ctx.check_handshake_count(2) {
            return TestResult::Failed;
        }
        if self.ctx.check_version_and_files(&self.files) != TestResult::Succeeded {
            return TestResult::Failed;
        }
        match self.ctx.client_trace().zero_rtt_count(Direction::FromClient) {
            Ok(0) => {
                self.ctx.log.info("Didn't find any 0-RTT packets.");
                TestResult::Failed
            }
            Ok(_) => TestResult::Succeeded,
            Err(e) => {
                self.ctx
                    .log
                    .info(format!("Could not count 0-RTT packets: {:#}", e));
                TestResult::Failed
            }
        }
    }
}

/// Transfer with ECN enabled; the trace must carry exactly one of the two
/// ECT codepoints in each direction.
struct EcnTest {
    ctx: TestContext,
    files: Vec<String>,
}

impl EcnTest {
    fn check_ecn_marks(&self, direction: Direction) -> bool {
        match self.ctx.client_trace().ecn_counts(direction) {
            Ok(counts) => {
                let ok = (counts.ect0 > 0) != (counts.ect1 > 0);
                if !ok {
                    self.ctx.log.info(format!(
                        "Expected exactly one of ECT(0)/ECT(1) to be used, got {:?}",
                        counts
                    ));
                }
                ok
            }
            Err(e) => {
                self.ctx
                    .log
                    .info(format!("Could not count ECN marks: {:#}", e));
                false
            }
        }
    }
}

impl TestCase for EcnTest {
    fn name(&self) -> &'static str {
        "ecn"
    }

    fn abbreviation(&self) -> &'static str {
        "E"
    }

    fn desc(&self) -> &'static str {
        "ECN marks are used and echoed correctly."
    }

    fn get_paths(&mut self) -> Result<Vec<String>> {
        self.files = vec![self.ctx.generate_random_file(KB)?];
        Ok(self.files.clone())
    }

    fn check(&mut self) -> TestResult {
        if !self.ctx.check_handshake_count(1) {
            return TestResult::Failed;
        }
        if self.ctx.check_version_and_files(&self.files) != TestResult::Succeeded {
            return TestResult::Failed;
        }
        if !self.check_ecn_marks(Direction::FromClient) {
            return TestResult::Failed;
        }
        if !self.check_ecn_marks(Direction::FromServer) {
            return TestResult::Failed;
        }
        TestResult::Succeeded
    }
}

/// Parameters of a goodput-style measurement.
struct GoodputParams {
    name: &'static str,
    abbreviation: &'static str,
    desc: &'static str,
    filesize: usize,
    timeout_secs: u64,
    extra_envs: &'static [(&'static str, &'static str)],
    extra_containers: &'static [&'static str],
}

/// Transfer one large file and derive goodput from the 1-RTT packet
/// timestamps on the client side of the simulator.
struct GoodputMeasurement {
    ctx: TestContext,
    files: Vec<String>,
    value: f64,
    params: &'static GoodputParams,
}

impl TestCase for GoodputMeasurement {
    fn name(&self) -> &'static str {
        self.params.name
    }

    fn abbreviation(&self) -> &'static str {
        self.params.abbreviation
    }

    fn desc(&self) -> &'static str {
        self.params.desc
    }

    fn testname(&self, _perspective: Perspective) -> &'static str {
        "transfer"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.params.timeout_secs)
    }

    fn additional_envs(&self) -> Vec<(String, String)> {
        self.params
            .extra_envs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn additional_containers(&self) -> Vec<&'static str> {
        self.params.extra_containers.to_vec()
    }

    fn get_paths(&mut self) -> Result<Vec<String>> {
        self.files = vec![self.ctx.generate_random_file(self.params.filesize)?];
        Ok(self.files.clone())
    }

    fn check(&mut self) -> TestResult {
        if !self.ctx.check_handshake_count(1) {
            return TestResult::Failed;
        }
        if self.ctx.check_version_and_files(&self.files) != TestResult::Succeeded {
            return TestResult::Failed;
        }

        let times = match self.ctx.client_trace().one_rtt_times(Direction::FromServer) {
            Ok(times) => times,
            Err(e) => {
                self.ctx
                    .log
                    .info(format!("Could not read 1-RTT packets: {:#}", e));
                return TestResult::Failed;
            }
        };
        let (Some(first), Some(last)) = (
            times.iter().copied().reduce(f64::min),
            times.iter().copied().reduce(f64::max),
        ) else {
            self.ctx.log.info("Didn't find any 1-RTT packets.");
            return TestResult::Failed;
        };
        let elapsed_ms = (last - first) * 1000.0;
        if elapsed_ms <= 0.0 {
            return TestResult::Failed;
        }

        // bits per millisecond is the same as kbps.
        self.value = (8 * self.params.filesize) as f64 / elapsed_ms;
        self.ctx.log.debug(format!(
            "Transferring {} MB took {:.0} ms. Goodput: {:.0} kbps",
            self.params.filesize / MB,
            elapsed_ms,
            self.value
        ));
        TestResult::Succeeded
    }
}

impl Measurement for GoodputMeasurement {
    fn result(&self) -> f64 {
        self.value
    }

    fn unit(&self) -> &'static str {
        "kbps"
    }

    fn repetitions(&self) -> usize {
        MEASUREMENT_REPETITIONS
    }

    fn as_test_case(&mut self) -> &mut dyn TestCase {
        self
    }
}

const MEASUREMENT_REPETITIONS: usize = 5;

/// Factory entry for one interop test.
#[derive(Debug)]
pub struct TestFactory {
    pub name: &'static str,
    pub abbreviation: &'static str,
    pub desc: &'static str,
    constructor: fn(TestContext) -> Box<dyn TestCase>,
}

impl TestFactory {
    pub fn instantiate(&self, ctx: TestContext) -> Box<dyn TestCase> {
        (self.constructor)(ctx)
    }
}

/// Factory entry for one measurement.
#[derive(Debug)]
pub struct MeasurementFactory {
    pub name: &'static str,
    pub abbreviation: &'static str,
    pub desc: &'static str,
    pub unit: &'static str,
    pub repetitions: usize,
    constructor: fn(TestContext) -> Box<dyn Measurement>,
}

impl MeasurementFactory {
    pub fn instantiate(&self, ctx: TestContext) -> Box<dyn Measurement> {
        (self.constructor)(ctx)
    }
}

const TRANSFER: TransferParams = TransferParams {
    name: "transfer",
    abbreviation: "DC",
    desc: "Stream data is being sent and received correctly.",
    testname: "transfer",
    scenario: DEFAULT_SCENARIO,
    timeout_secs: 60,
    files: FilePlan::Sizes(&[2 * MB, 3 * MB, 5 * MB]),
    expected_handshakes: 1,
};

const MULTIPLEXING: TransferParams = TransferParams {
    name: "multiplexing",
    abbreviation: "M",
    desc: "Thousands of files are transferred over a single connection.",
    testname: "transfer",
    scenario: DEFAULT_SCENARIO,
    timeout_secs: 60,
    files: FilePlan::Repeated {
        count: 2000,
        size: 32,
    },
    expected_handshakes: 1,
};

const CHACHA20: TransferParams = TransferParams {
    name: "chacha20",
    abbreviation: "C20",
    desc: "Handshake completes using ChaCha20.",
    testname: "chacha20",
    scenario: DEFAULT_SCENARIO,
    timeout_secs: 60,
    files: FilePlan::Sizes(&[3 * MB]),
    expected_handshakes: 1,
};

const RESUMPTION: TransferParams = TransferParams {
    name: "resumption",
    abbreviation: "R",
    desc: "Connection is established using TLS Session Resumption.",
    testname: "resumption",
    scenario: DEFAULT_SCENARIO,
    timeout_secs: 60,
    files: FilePlan::Sizes(&[5 * KB, 10 * KB]),
    expected_handshakes: 2,
};

const HTTP3: TransferParams = TransferParams {
    name: "http3",
    abbreviation: "3",
    desc: "An H3 transaction succeeded.",
    testname: "http3",
    scenario: DEFAULT_SCENARIO,
    timeout_secs: 60,
    files: FilePlan::Sizes(&[5 * KB, 10 * KB, 500 * KB]),
    expected_handshakes: 1,
};

const BLACKHOLE: TransferParams = TransferParams {
    name: "blackhole",
    abbreviation: "B",
    desc: "Transfer succeeds despite the network blacking out for a few seconds.",
    testname: "transfer",
    scenario: "blackhole --delay=15ms --bandwidth=10Mbps --queue=25 --on=5s --off=2s",
    timeout_secs: 60,
    files: FilePlan::Sizes(&[10 * MB]),
    expected_handshakes: 1,
};

const HANDSHAKE_LOSS: TransferParams = TransferParams {
    name: "handshakeloss",
    abbreviation: "L1",
    desc: "Handshake completes under extreme packet loss.",
    testname: "multiconnect",
    scenario: "drop-rate --delay=15ms --bandwidth=10Mbps --queue=25 --rate_to_server=30 --rate_to_client=30",
    timeout_secs: 300,
    files: FilePlan::Repeated {
        count: 50,
        size: KB,
    },
    expected_handshakes: 50,
};

const TRANSFER_LOSS: TransferParams = TransferParams {
    name: "transferloss",
    abbreviation: "L2",
    desc: "Transfer completes under moderate packet loss.",
    testname: "transfer",
    scenario: "drop-rate --delay=15ms --bandwidth=10Mbps --queue=25 --rate_to_server=2 --rate_to_client=2",
    timeout_secs: 60,
    files: FilePlan::Sizes(&[2 * MB]),
    expected_handshakes: 1,
};

const GOODPUT: GoodputParams = GoodputParams {
    name: "goodput",
    abbreviation: "G",
    desc: "Measures connection goodput over a 10Mbps link.",
    filesize: 10 * MB,
    timeout_secs: 60,
    extra_envs: &[],
    extra_containers: &[],
};

const CROSS_TRAFFIC: GoodputParams = GoodputParams {
    name: "crosstraffic",
    abbreviation: "C",
    desc: "Measures goodput while competing with a TCP (cubic) connection.",
    filesize: 25 * MB,
    timeout_secs: 180,
    extra_envs: &[("IPERF_CONGESTION", "cubic")],
    extra_containers: &["iperf_server", "iperf_client"],
};

/// All interop tests, in matrix order.
pub static TESTCASES: &[TestFactory] = &[
    TestFactory {
        name: "versionnegotiation",
        abbreviation: "V",
        desc: "A version negotiation packet is elicited and acted on.",
        constructor: |ctx| Box::new(VersionNegotiationTest { ctx }),
    },
    TestFactory {
        name: "handshake",
        abbreviation: "H",
        desc: "Handshake completes successfully.",
        constructor: |ctx| {
            Box::new(HandshakeTest {
                ctx,
                files: Vec::new(),
            })
        },
    },
    TestFactory {
        name: TRANSFER.name,
        abbreviation: TRANSFER.abbreviation,
        desc: TRANSFER.desc,
        constructor: |ctx| {
            Box::new(TransferTest {
                ctx,
                files: Vec::new(),
                params: &TRANSFER,
            })
        },
    },
    TestFactory {
        name: MULTIPLEXING.name,
        abbreviation: MULTIPLEXING.abbreviation,
        desc: MULTIPLEXING.desc,
        constructor: |ctx| {
            Box::new(TransferTest {
                ctx,
                files: Vec::new(),
                params: &MULTIPLEXING,
            })
        },
    },
    TestFactory {
        name: CHACHA20.name,
        abbreviation: CHACHA20.abbreviation,
        desc: CHACHA20.desc,
        constructor: |ctx| {
            Box::new(TransferTest {
                ctx,
                files: Vec::new(),
                params: &CHACHA20,
            })
        },
    },
    TestFactory {
        name: "retry",
        abbreviation: "S",
        desc: "Server sends a Retry, and a subsequent connection using the Retry token completes successfully.",
        constructor: |ctx| {
            Box::new(RetryTest {
                ctx,
                files: Vec::new(),
            })
        },
    },
    TestFactory {
        name: RESUMPTION.name,
        abbreviation: RESUMPTION.abbreviation,
        desc: RESUMPTION.desc,
        constructor: |ctx| {
            Box::new(TransferTest {
                ctx,
                files: Vec::new(),
                params: &RESUMPTION,
            })
        },
    },
    TestFactory {
        name: "zerortt",
        abbreviation: "Z",
        desc: "0-RTT data is being sent and acted on.",
        constructor: |ctx| {
            Box::new(ZeroRttTest {
                ctx,
                files: Vec::new(),
            })
        },
    },
    TestFactory {
        name: HTTP3.name,
        abbreviation: HTTP3.abbreviation,
        desc: HTTP3.desc,
        constructor: |ctx| {
            Box::new(TransferTest {
                ctx,
                files: Vec::new(),
                params: &HTTP3,
            })
        },
    },
    TestFactory {
        name: BLACKHOLE.name,
        abbreviation: BLACKHOLE.abbreviation,
        desc: BLACKHOLE.desc,
        constructor: |ctx| {
            Box::new(TransferTest {
                ctx,
                files: Vec::new(),
                params: &BLACKHOLE,
            })
        },
    },
    TestFactory {
        name: HANDSHAKE_LOSS.name,
        abbreviation: HANDSHAKE_LOSS.abbreviation,
        desc: HANDSHAKE_LOSS.desc,
        constructor: |ctx| {
            Box::new(TransferTest {
                ctx,
                files: Vec::new(),
                params: &HANDSHAKE_LOSS,
            })
        },
    },
    TestFactory {
        name: TRANSFER_LOSS.name,
        abbreviation: TRANSFER_LOSS.abbreviation,
        desc: TRANSFER_LOSS.desc,
        constructor: |ctx| {
            Box::new(TransferTest {
                ctx,
                files: Vec::new(),
                params: &TRANSFER_LOSS,
            })
        },
    },
    TestFactory {
        name: "ecn",
        abbreviation: "E",
        desc: "ECN marks are used and echoed correctly.",
        constructor: |ctx| {
            Box::new(EcnTest {
                ctx,
                files: Vec::new(),
            })
        },
    },
];

/// All measurements, in matrix order.
pub static MEASUREMENTS: &[MeasurementFactory] = &[
    MeasurementFactory {
        name: GOODPUT.name,
        abbreviation: GOODPUT.abbreviation,
        desc: GOODPUT.desc,
        unit: "kbps",
        repetitions: MEASUREMENT_REPETITIONS,
        constructor: |ctx| {
            Box::new(GoodputMeasurement {
                ctx,
                files: Vec::new(),
                value: 0.0,
                params: &GOODPUT,
            })
        },
    },
    MeasurementFactory {
        name: CROSS_TRAFFIC.name,
        abbreviation: CROSS_TRAFFIC.abbreviation,
        desc: CROSS_TRAFFIC.desc,
        unit: "kbps",
        repetitions: MEASUREMENT_REPETITIONS,
        constructor: |ctx| {
            Box::new(GoodputMeasurement {
                ctx,
                files: Vec::new(),
                value: 0.0,
                params: &CROSS_TRAFFIC,
            })
        },
    },
];

/// Look up a test by its stable name.
pub fn find_test(name: &str) -> Option<&'static TestFactory> {
    TESTCASES.iter().find(|t| t.name == name)
}

/// Look up a measurement by its stable name.
pub fn find_measurement(name: &str) -> Option<&'static MeasurementFactory> {
    MEASUREMENTS.iter().find(|m| m.name == name)
}
