//! # Interop Runner
//!
//! The orchestration engine. For every admitted (client, server) pair the
//! runner fans the selected test cases out to a bounded worker pool, runs
//! the measurements serially afterwards, folds the verdicts into the result
//! matrix, applies the auto-downgrade post-processing pass and hands the
//! final matrix to the reporter.
//!
//! ## Lifecycle of one test run
//!
//! 1. Lease a subnet index and build a fresh workspace.
//! 2. Instantiate the test case and let it populate `www/`.
//! 3. Assemble the environment bundle and bring up the container group
//!    (`sim`, `client`, `server` plus any companions) with
//!    abort-on-first-exit semantics under the test's timeout.
//! 4. Copy `/logs` out of the containers, tear the group down.
//! 5. Classify the captured output, run the test's own check when the
//!    client exited cleanly, and promote the logs on a terminal verdict.
//!
//! Runs buffer all their log records in a [`RunLog`]; the records are
//! replayed to the console in submission order once the pair completes, so
//! parallel runs never interleave console output.

use crate::cli::RunConfig;
use crate::docker::{compliance_project, interop_project, ComposeRunner};
use crate::implementations::Implementation;
use crate::logging::RunLog;
use crate::result::{MeasurementResult, TestResult};
use crate::subnet::{SubnetAllocator, SubnetLease};
use crate::testcase::{Measurement, Perspective, TestCase, TestContext};
use crate::testcases::{MeasurementFactory, TestFactory};
use crate::utils::{mean, stdev};
use crate::workspace::Workspace;
use crate::{defaults, report};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// What the captured group output alone says about the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputVerdict {
    /// An endpoint signalled an unknown test case via exit code 127.
    Unsupported,
    /// The run failed outright (bad exit, timeout, client never finished).
    Failed,
    /// The client exited cleanly; the test's own check decides.
    RunCheck,
}

/// Check for the unknown-test-case signal.
pub fn is_unsupported(output: &str) -> bool {
    output.contains("exited with code 127") || output.contains("exit status 127")
}

fn client_exited_cleanly(output: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("client.*exited with code 0").expect("static pattern"))
        .is_match(output)
}

/// Classify the captured output of a finished container group.
///
/// Pure in the output bytes and the timeout flag: identical inputs yield
/// identical verdicts. The unknown-test-case signal wins even over a
/// timeout.
pub fn classify_output(output: &str, timed_out: bool) -> OutputVerdict {
    if is_unsupported(output) {
        OutputVerdict::Unsupported
    } else if timed_out {
        OutputVerdict::Failed
    } else if client_exited_cleanly(output) {
        OutputVerdict::RunCheck
    } else {
        OutputVerdict::Failed
    }
}

/// Format the detail string of a successful measurement.
pub fn format_measurement_details(values: &[f64], unit: &str) -> String {
    format!(
        "{} (± {}) {}",
        mean(values).round() as i64,
        stdev(values).round() as i64,
        unit
    )
}

/// Verdicts of one (server, client) pair.
#[derive(Debug, Clone, Default)]
pub struct PairResult {
    pub tests: BTreeMap<String, TestResult>,
    pub measurements: BTreeMap<String, MeasurementResult>,
}

/// The two-level verdict matrix, keyed by (server, client).
///
/// Cells start absent and are written exactly once by the executor; only
/// [`auto_downgrade`] rewrites them afterwards, and only from `failed` or
/// `unsupported` to `unsupported`.
#[derive(Debug, Clone, Default)]
pub struct Matrix {
    pairs: BTreeMap<(String, String), PairResult>,
}

impl Matrix {
    pub fn set_test(&mut self, server: &str, client: &str, test: &str, result: TestResult) {
        self.pairs
            .entry((server.to_string(), client.to_string()))
            .or_default()
            .tests
            .insert(test.to_string(), result);
    }

    pub fn test(&self, server: &str, client: &str, test: &str) -> Option<TestResult> {
        self.pairs
            .get(&(server.to_string(), client.to_string()))
            .and_then(|pair| pair.tests.get(test).copied())
    }

    pub fn set_measurement(
        &mut self,
        server: &str,
        client: &str,
        measurement: &str,
        result: MeasurementResult,
    ) {
        self.pairs
            .entry((server.to_string(), client.to_string()))
            .or_default()
            .measurements
            .insert(measurement.to_string(), result);
    }

    pub fn measurement(
        &self,
        server: &str,
        client: &str,
        measurement: &str,
    ) -> Option<MeasurementResult> {
        self.pairs
            .get(&(server.to_string(), client.to_string()))
            .and_then(|pair| pair.measurements.get(measurement).cloned())
    }

    pub fn pair(&self, server: &str, client: &str) -> Option<&PairResult> {
        self.pairs.get(&(server.to_string(), client.to_string()))
    }

    /// Number of `failed` cells, tests and measurements combined. This is
    /// the process exit code.
    pub fn failed_count(&self) -> u64 {
        self.pairs
            .values()
            .map(|pair| {
                pair.tests
                    .values()
                    .filter(|r| **r == TestResult::Failed)
                    .count() as u64
                    + pair
                        .measurements
                        .values()
                        .filter(|r| r.result == TestResult::Failed)
                        .count() as u64
            })
            .sum()
    }
}

/// Rewrite tests that failed against every peer to `unsupported`.
///
/// If a client's verdict for a test is `failed` or `unsupported` against
/// every server, the implementation evidently does not support the feature
/// and all of those cells become `unsupported`; symmetrically for servers.
/// A single peer is no evidence (the peer might simply be broken), so the
/// pass only runs when both axes have more than one member. Implementations
/// named in `exempt` are never downgraded.
pub fn auto_downgrade(
    matrix: &mut Matrix,
    servers: &[String],
    clients: &[String],
    test_names: &[&str],
    exempt: &HashSet<String>,
) {
    if servers.len() > 1 && clients.len() > 1 {
        for client in clients {
            if exempt.contains(client) {
                continue;
            }
            for test in test_names {
                let all_negative = servers.iter().all(|server| {
                    matches!(
                        matrix.test(server, client, test),
                        Some(TestResult::Failed) | Some(TestResult::Unsupported)
                    )
                });
                if all_negative {
                    for server in servers {
                        matrix.set_test(server, client, test, TestResult::Unsupported);
                    }
                }
            }
        }
    }

    if servers.len() > 1 && clients.len() > 1 {
        for server in servers {
            if exempt.contains(server) {
                continue;
            }
            for test in test_names {
                let all_negative = clients.iter().all(|client| {
                    matches!(
                        matrix.test(server, client, test),
                        Some(TestResult::Failed) | Some(TestResult::Unsupported)
                    )
                });
                if all_negative {
                    for client in clients {
                        matrix.set_test(server, client, test, TestResult::Unsupported);
                    }
                }
            }
        }
    }
}

/// The orchestration engine. One instance per harness invocation.
pub struct InteropRunner {
    config: RunConfig,
    allocator: Arc<SubnetAllocator>,
    /// Memoized compliance verdicts per (implementation, role).
    compliance: Mutex<HashMap<(String, Perspective), bool>>,
    /// Compose projects currently up, for interrupt teardown.
    active: Arc<Mutex<HashSet<String>>>,
}

impl InteropRunner {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            allocator: Arc::new(SubnetAllocator::new()),
            compliance: Mutex::new(HashMap::new()),
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn implementation(&self, name: &str) -> &Implementation {
        &self.config.registry[name]
    }

    /// Bring down every container group that is still up. Called on
    /// interrupt, after the run future has been dropped.
    pub async fn shutdown(&self) {
        let projects: Vec<String> = self.active.lock().unwrap().iter().cloned().collect();
        for project in projects {
            info!("Bringing down container group {}", project);
            ComposeRunner::new(project).down().await;
        }
    }

    /// Run the full matrix and return the number of failed cells.
    pub async fn run(self: Arc<Self>) -> Result<u64> {
        let start_time = Utc::now();
        self.prepare_log_dir()?;

        let mut matrix = Matrix::default();
        let servers = self.config.servers.clone();
        let clients = self.config.clients.clone();

        for server in &servers {
            for client in &clients {
                if let Some(required) = &self.config.must_include {
                    if server != required && client != required {
                        debug!(
                            "Skipping {} / {}: does not include {}",
                            server, client, required
                        );
                        continue;
                    }
                }
                info!(
                    "Running with server {} ({}) and client {} ({})",
                    server,
                    self.implementation(server).image,
                    client,
                    self.implementation(client).image
                );
                if !(self.is_compliant(server, Perspective::Server).await
                    && self.is_compliant(client, Perspective::Client).await)
                {
                    info!("Not compliant, skipping");
                    continue;
                }

                Arc::clone(&self).run_pair(server, client, &mut matrix).await;
            }
        }

        let test_names: Vec<&str> = self.config.tests.iter().map(|t| t.name).collect();
        auto_downgrade(
            &mut matrix,
            &servers,
            &clients,
            &test_names,
            &self.config.no_auto_unsupported,
        );

        let end_time = Utc::now();
        report::print_matrix(&matrix, &self.config);
        if let Some(path) = &self.config.json_path {
            if let Err(e) = report::export_json(path, &matrix, &self.config, start_time, end_time)
            {
                error!("Could not write JSON report to {}: {:#}", path.display(), e);
            }
        }

        Ok(matrix.failed_count())
    }

    fn prepare_log_dir(&self) -> Result<()> {
        let log_dir = &self.config.log_dir;
        if log_dir.exists() && log_dir.read_dir()?.next().is_some() {
            bail!("log directory {} already exists", log_dir.display());
        }
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;
        Ok(())
    }

    /// All tests of one pair through the worker pool, then the
    /// measurements, serially, so that bandwidth-sensitive numbers are not
    /// distorted by co-scheduled neighbors.
    async fn run_pair(self: Arc<Self>, server: &str, client: &str, matrix: &mut Matrix) {
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism));
        let mut handles = Vec::with_capacity(self.config.tests.len());

        for factory in &self.config.tests {
            let this = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            let server = server.to_string();
            let client = client.to_string();
            let factory: &'static TestFactory = *factory;
            handles.push((
                factory,
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    this.run_test(&server, &client, factory).await
                }),
            ));
            // Stagger submissions so the container runtime is not hit by a
            // thundering herd of simultaneous group startups.
            tokio::time::sleep(defaults::SUBMISSION_STAGGER).await;
        }

        for (factory, handle) in handles {
            let (result, log) = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Test task for {} panicked: {}", factory.name, e);
                    (TestResult::Failed, Arc::new(RunLog::new()))
                }
            };
            log.replay();
            matrix.set_test(server, client, factory.name, result);
        }

        for factory in &self.config.measurements {
            let factory: &'static MeasurementFactory = *factory;
            let result = self.run_measurement(server, client, factory).await;
            matrix.set_measurement(server, client, factory.name, result);
        }
    }

    /// Measurement driver: repeat the run, short-circuit on the first
    /// non-success, reduce the samples to mean and standard deviation.
    async fn run_measurement(
        &self,
        server: &str,
        client: &str,
        factory: &'static MeasurementFactory,
    ) -> MeasurementResult {
        let mut values = Vec::with_capacity(factory.repetitions);
        for repetition in 0..factory.repetitions {
            let (result, value, log) = self
                .run_measurement_repetition(server, client, factory, repetition)
                .await;
            log.replay();
            if result != TestResult::Succeeded {
                return MeasurementResult::without_details(result);
            }
            if let Some(value) = value {
                values.push(value);
            }
        }
        MeasurementResult {
            result: TestResult::Succeeded,
            details: format_measurement_details(&values, factory.unit),
        }
    }

    async fn run_test(
        &self,
        server: &str,
        client: &str,
        factory: &'static TestFactory,
    ) -> (TestResult, Arc<RunLog>) {
        let log = Arc::new(RunLog::new());
        let (lease, workspace) = match self.setup_run(&log) {
            Ok(prepared) => prepared,
            Err(e) => {
                log.error(format!("Could not set up the test run: {:#}", e));
                return (TestResult::Failed, log);
            }
        };
        let ctx = self.test_context(&workspace, &lease, &log);
        let mut case = factory.instantiate(ctx);
        let result = self
            .run_case(server, client, &mut *case, None, &log, &workspace, &lease)
            .await;
        (result, log)
    }

    async fn run_measurement_repetition(
        &self,
        server: &str,
        client: &str,
        factory: &'static MeasurementFactory,
        repetition: usize,
    ) -> (TestResult, Option<f64>, Arc<RunLog>) {
        let log = Arc::new(RunLog::new());
        let (lease, workspace) = match self.setup_run(&log) {
            Ok(prepared) => prepared,
            Err(e) => {
                log.error(format!("Could not set up the measurement run: {:#}", e));
                return (TestResult::Failed, None, log);
            }
        };
        let ctx = self.test_context(&workspace, &lease, &log);
        let mut case = factory.instantiate(ctx);
        let result = self
            .run_case(
                server,
                client,
                case.as_test_case(),
                Some(repetition),
                &log,
                &workspace,
                &lease,
            )
            .await;
        let value = (result == TestResult::Succeeded).then(|| case.result());
        (result, value, log)
    }

    fn setup_run(&self, log: &Arc<RunLog>) -> Result<(SubnetLease, Workspace)> {
        let lease = self.allocator.allocate();
        log.debug(format!("Using subnet index {}", lease.index()));
        let workspace = Workspace::new()?;
        Ok((lease, workspace))
    }

    fn test_context(
        &self,
        workspace: &Workspace,
        lease: &SubnetLease,
        log: &Arc<RunLog>,
    ) -> TestContext {
        TestContext {
            www_dir: workspace.www_dir().to_path_buf(),
            download_dir: workspace.download_dir().to_path_buf(),
            certs_dir: workspace.certs_dir().to_path_buf(),
            sim_log_dir: workspace.sim_log_dir().to_path_buf(),
            client_keylog: workspace.client_keylog(),
            server_keylog: workspace.server_keylog(),
            addrs: lease.bundle().clone(),
            log: Arc::clone(log),
        }
    }

    /// The shared run body behind both entry points. Measurements are
    /// viewed as plain test cases here; the repetition entry point reads
    /// the sample off the concrete instance afterwards.
    #[allow(clippy::too_many_arguments)]
    async fn run_case(
        &self,
        server: &str,
        client: &str,
        case: &mut dyn TestCase,
        repetition: Option<usize>,
        log: &Arc<RunLog>,
        workspace: &Workspace,
        lease: &SubnetLease,
    ) -> TestResult {
        log.info(format!(
            "Server: {}. Client: {}. Running test case: {}",
            server,
            client,
            case.name()
        ));

        if let Err(e) = workspace
            .generate_certs(case.cert_chain_length(), log)
            .await
        {
            log.error(format!("Unable to create certificates: {:#}", e));
            return TestResult::Failed;
        }

        let paths = match tokio::task::block_in_place(|| case.get_paths()) {
            Ok(paths) => paths,
            Err(e) => {
                log.error(format!("Could not generate the test files: {:#}", e));
                return TestResult::Failed;
            }
        };
        let requests = paths
            .iter()
            .map(|path| format!("{}{}", case.url_prefix(), path))
            .collect::<Vec<_>>()
            .join(" ");
        log.debug(format!("Requests: {}", requests));

        let env = self.environment(server, client, case, &requests, workspace, lease);
        let mut containers = vec!["sim", "client", "server"];
        containers.extend(case.additional_containers());

        let project = interop_project(server, client, case.name(), lease.index());
        let runner = ComposeRunner::new(project);
        self.active.lock().unwrap().insert(runner.project().to_string());

        let outcome = runner.up(&env, &containers, case.timeout()).await;
        if outcome.timed_out {
            log.debug(format!(
                "Test failed: took longer than {}s.",
                case.timeout().as_secs()
            ));
            runner.stop(defaults::TIMEOUT_STOP_GRACE).await;
        }
        log.debug(outcome.output.clone());

        runner.collect_logs("sim", workspace.sim_log_dir(), log).await;
        runner
            .collect_logs("client", workspace.client_log_dir(), log)
            .await;
        runner
            .collect_logs("server", workspace.server_log_dir(), log)
            .await;

        runner.down().await;
        self.active.lock().unwrap().remove(runner.project());

        let result = match classify_output(&outcome.output, outcome.timed_out) {
            OutputVerdict::Unsupported => TestResult::Unsupported,
            OutputVerdict::Failed => TestResult::Failed,
            OutputVerdict::RunCheck => tokio::task::block_in_place(|| case.check()),
        };

        // Terminal verdicts promote their logs into the persistent tree.
        if result != TestResult::Unsupported {
            let mut dest = self
                .config
                .log_dir
                .join(format!("{}_{}", server, client))
                .join(case.name());
            if let Some(repetition) = repetition {
                dest = dest.join(repetition.to_string());
            }
            let preserve = self.config.save_files && result == TestResult::Failed;
            if let Err(e) = workspace.promote(&dest, log, preserve) {
                log.error(format!("Could not save the run's logs: {:#}", e));
            }
        }

        result
    }

    fn environment(
        &self,
        server: &str,
        client: &str,
        case: &dyn TestCase,
        requests: &str,
        workspace: &Workspace,
        lease: &SubnetLease,
    ) -> Vec<(String, String)> {
        let path = |p: &std::path::Path| p.to_string_lossy().into_owned();
        let mut env = vec![
            ("CERTS".to_string(), path(workspace.certs_dir())),
            ("WWW".to_string(), path(workspace.www_dir())),
            ("DOWNLOADS".to_string(), path(workspace.download_dir())),
            ("SIM_LOGS".to_string(), path(workspace.sim_log_dir())),
            ("CLIENT_LOGS".to_string(), path(workspace.client_log_dir())),
            ("SERVER_LOGS".to_string(), path(workspace.server_log_dir())),
            (
                "TESTCASE_CLIENT".to_string(),
                case.testname(Perspective::Client).to_string(),
            ),
            (
                "TESTCASE_SERVER".to_string(),
                case.testname(Perspective::Server).to_string(),
            ),
            ("SCENARIO".to_string(), case.scenario().to_string()),
            ("REQUESTS".to_string(), requests.to_string()),
            ("CLIENT".to_string(), self.implementation(client).image.clone()),
            ("SERVER".to_string(), self.implementation(server).image.clone()),
            ("WAITFORSERVER".to_string(), "server:443".to_string()),
        ];
        env.extend(lease.bundle().env());
        env.extend(case.additional_envs());
        env
    }

    /// Compliance gate: probe whether the implementation answers an
    /// unknown test case with exit code 127. Each (implementation, role)
    /// is probed at most once per process lifetime.
    async fn is_compliant(&self, name: &str, role: Perspective) -> bool {
        let key = (name.to_string(), role);
        if let Some(verdict) = self.compliance.lock().unwrap().get(&key) {
            debug!("{} already tested for compliance: {}", name, verdict);
            return *verdict;
        }
        let verdict = self.probe_compliance(name, role).await;
        self.compliance.lock().unwrap().insert(key, verdict);
        verdict
    }

    async fn probe_compliance(&self, name: &str, role: Perspective) -> bool {
        let (role_label, testcase_var, container) = match role {
            Perspective::Client => ("client", "TESTCASE_CLIENT", "client"),
            Perspective::Server => ("server", "TESTCASE_SERVER", "server"),
        };
        debug!("Checking compliance of {} {}", name, role_label);

        let lease = self.allocator.allocate();
        let workspace = match Workspace::new() {
            Ok(ws) => ws,
            Err(e) => {
                error!("Could not set up the compliance probe: {:#}", e);
                return false;
            }
        };
        let log = Arc::new(RunLog::new());
        if let Err(e) = workspace.generate_certs(1, &log).await {
            error!("Unable to create certificates: {:#}", e);
            return false;
        }

        let path = |p: &std::path::Path| p.to_string_lossy().into_owned();
        let image = self.implementation(name).image.clone();
        let mut env = vec![
            (testcase_var.to_string(), crate::utils::random_string(6)),
            ("CERTS".to_string(), path(workspace.certs_dir())),
            ("WWW".to_string(), path(workspace.www_dir())),
            ("DOWNLOADS".to_string(), path(workspace.download_dir())),
            ("SIM_LOGS".to_string(), path(workspace.sim_log_dir())),
            ("CLIENT_LOGS".to_string(), path(workspace.client_log_dir())),
            ("SERVER_LOGS".to_string(), path(workspace.server_log_dir())),
            (
                "SCENARIO".to_string(),
                crate::testcase::DEFAULT_SCENARIO.to_string(),
            ),
            ("CLIENT".to_string(), image.clone()),
            ("SERVER".to_string(), image),
        ];
        env.extend(lease.bundle().env());

        let project = compliance_project(name, lease.index());
        let runner = ComposeRunner::new(project);
        self.active.lock().unwrap().insert(runner.project().to_string());
        let outcome = runner
            .up(&env, &["sim", container], crate::testcase::DEFAULT_TIMEOUT)
            .await;
        runner.down().await;
        self.active.lock().unwrap().remove(runner.project());

        if !is_unsupported(&outcome.output) {
            error!("{} {} not compliant.", name, role_label);
            debug!("{}", outcome.output);
            return false;
        }
        debug!("{} {} compliant.", name, role_label);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::implementations::{Implementation, Registry, Role};
    use std::path::PathBuf;

    fn test_config() -> RunConfig {
        let mut registry = Registry::new();
        registry.insert(
            "quic-go".to_string(),
            Implementation {
                image: "martenseemann/quic-go-interop:latest".to_string(),
                url: "https://github.com/quic-go/quic-go".to_string(),
                role: Role::Both,
            },
        );
        RunConfig {
            registry,
            servers: vec!["quic-go".to_string()],
            clients: vec!["quic-go".to_string()],
            tests: Vec::new(),
            measurements: Vec::new(),
            log_dir: PathBuf::from("logs_test"),
            save_files: false,
            json_path: None,
            markdown: false,
            parallelism: 1,
            must_include: None,
            no_auto_unsupported: HashSet::new(),
        }
    }

    #[tokio::test]
    async fn compliance_verdicts_are_memoized_per_role() {
        let runner = InteropRunner::new(test_config());
        runner.compliance.lock().unwrap().insert(
            ("quic-go".to_string(), Perspective::Client),
            true,
        );
        runner.compliance.lock().unwrap().insert(
            ("quic-go".to_string(), Perspective::Server),
            false,
        );

        // Cached verdicts are answered without spawning any containers,
        // and the two roles are tracked independently.
        assert!(runner.is_compliant("quic-go", Perspective::Client).await);
        assert!(!runner.is_compliant("quic-go", Perspective::Server).await);
    }

    #[test]
    fn unsupported_signal_wins_over_everything() {
        let output = "interop_srv_cli_handshake_0-client_1 exited with code 127";
        assert_eq!(
            classify_output(output, false),
            OutputVerdict::Unsupported
        );
        // Even a timed-out run that carries the signal is unsupported.
        assert_eq!(classify_output(output, true), OutputVerdict::Unsupported);
        assert_eq!(
            classify_output("process finished: exit status 127", false),
            OutputVerdict::Unsupported
        );
    }

    #[test]
    fn clean_client_exit_defers_to_the_check() {
        let output = "sim_1 exited with code 0\nclient_1 exited with code 0";
        assert_eq!(classify_output(output, false), OutputVerdict::RunCheck);
    }

    #[test]
    fn timeouts_and_bad_exits_fail() {
        assert_eq!(
            classify_output("client_1 exited with code 1", false),
            OutputVerdict::Failed
        );
        assert_eq!(
            classify_output("client_1 exited with code 0", true),
            OutputVerdict::Failed
        );
        assert_eq!(classify_output("", false), OutputVerdict::Failed);
    }

    #[test]
    fn classification_is_pure_in_the_output() {
        let output = "server_1 exited with code 0";
        assert_eq!(
            classify_output(output, false),
            classify_output(output, false)
        );
    }

    #[test]
    fn measurement_details_format() {
        let values = [9800.0, 9900.0, 10000.0, 10100.0, 10200.0];
        assert_eq!(
            format_measurement_details(&values, "kbps"),
            "10000 (± 158) kbps"
        );
    }

    #[test]
    fn matrix_counts_failed_cells() {
        let mut matrix = Matrix::default();
        matrix.set_test("s", "c", "handshake", TestResult::Failed);
        matrix.set_test("s", "c", "transfer", TestResult::Succeeded);
        matrix.set_measurement(
            "s",
            "c",
            "goodput",
            MeasurementResult::without_details(TestResult::Failed),
        );
        assert_eq!(matrix.failed_count(), 2);
    }

    fn full_matrix(
        servers: &[&str],
        clients: &[&str],
        test: &str,
        result: TestResult,
    ) -> Matrix {
        let mut matrix = Matrix::default();
        for server in servers {
            for client in clients {
                matrix.set_test(server, client, test, result);
            }
        }
        matrix
    }

    #[test]
    fn auto_downgrade_rewrites_universally_failed_tests() {
        let servers: Vec<String> = vec!["s1".into(), "s2".into(), "s3".into()];
        let clients: Vec<String> = vec!["c1".into(), "c2".into()];
        let mut matrix = full_matrix(&["s1", "s2", "s3"], &["c1", "c2"], "chacha20", TestResult::Failed);

        auto_downgrade(
            &mut matrix,
            &servers,
            &clients,
            &["chacha20"],
            &HashSet::new(),
        );

        for server in &servers {
            for client in &clients {
                assert_eq!(
                    matrix.test(server, client, "chacha20"),
                    Some(TestResult::Unsupported)
                );
            }
        }
    }

    #[test]
    fn auto_downgrade_spares_tests_with_a_success() {
        let servers: Vec<String> = vec!["s1".into(), "s2".into()];
        let clients: Vec<String> = vec!["c1".into(), "c2".into()];
        let mut matrix = full_matrix(&["s1", "s2"], &["c1", "c2"], "retry", TestResult::Failed);
        matrix.set_test("s1", "c1", "retry", TestResult::Succeeded);

        auto_downgrade(&mut matrix, &servers, &clients, &["retry"], &HashSet::new());

        // The lone success protects s1/c1. c2 lost against every server, so
        // its row is downgraded; that in turn leaves s2 without a success
        // against any client, and the server-axis rule downgrades s2's
        // remaining cell as well.
        assert_eq!(matrix.test("s1", "c1", "retry"), Some(TestResult::Succeeded));
        assert_eq!(
            matrix.test("s2", "c1", "retry"),
            Some(TestResult::Unsupported)
        );
        assert_eq!(
            matrix.test("s1", "c2", "retry"),
            Some(TestResult::Unsupported)
        );
        assert_eq!(
            matrix.test("s2", "c2", "retry"),
            Some(TestResult::Unsupported)
        );
    }

    #[test]
    fn auto_downgrade_skips_single_member_axes() {
        // A single server is no evidence against a client, and the lone
        // server's column must not be judged either.
        let servers: Vec<String> = vec!["s1".into()];
        let clients: Vec<String> = vec!["c1".into(), "c2".into()];
        let mut matrix = full_matrix(&["s1"], &["c1", "c2"], "chacha20", TestResult::Failed);

        auto_downgrade(
            &mut matrix,
            &servers,
            &clients,
            &["chacha20"],
            &HashSet::new(),
        );

        assert_eq!(matrix.test("s1", "c1", "chacha20"), Some(TestResult::Failed));
        assert_eq!(matrix.test("s1", "c2", "chacha20"), Some(TestResult::Failed));

        let mut matrix = full_matrix(&["s1", "s2"], &["c1"], "chacha20", TestResult::Failed);
        auto_downgrade(
            &mut matrix,
            &["s1".to_string(), "s2".to_string()],
            &["c1".to_string()],
            &["chacha20"],
            &HashSet::new(),
        );
        assert_eq!(matrix.test("s1", "c1", "chacha20"), Some(TestResult::Failed));
        assert_eq!(matrix.test("s2", "c1", "chacha20"), Some(TestResult::Failed));
    }

    #[test]
    fn auto_downgrade_honors_the_opt_out_set() {
        let servers: Vec<String> = vec!["s1".into(), "s2".into()];
        let clients: Vec<String> = vec!["c1".into(), "c2".into()];
        let mut matrix = full_matrix(&["s1", "s2"], &["c1", "c2"], "ecn", TestResult::Failed);

        // Exempting every implementation leaves the matrix untouched.
        let exempt: HashSet<String> =
            ["s1", "s2", "c1", "c2"].iter().map(|s| s.to_string()).collect();
        auto_downgrade(&mut matrix, &servers, &clients, &["ecn"], &exempt);

        for server in &servers {
            for client in &clients {
                assert_eq!(matrix.test(server, client, "ecn"), Some(TestResult::Failed));
            }
        }
    }

    #[test]
    fn auto_downgrade_leaves_absent_cells_absent() {
        let servers: Vec<String> = vec!["s1".into(), "s2".into()];
        let clients: Vec<String> = vec!["c1".into()];
        // Only s1 ran; s2's cell is absent, so no universal verdict exists.
        let mut matrix = Matrix::default();
        matrix.set_test("s1", "c1", "http3", TestResult::Failed);

        auto_downgrade(&mut matrix, &servers, &clients, &["http3"], &HashSet::new());

        assert_eq!(matrix.test("s1", "c1", "http3"), Some(TestResult::Failed));
        assert_eq!(matrix.test("s2", "c1", "http3"), None);
    }
}
