//! # Process Group Runner
//!
//! Launches a named group of containers through `docker compose`, enforces
//! the per-run timeout and tears the group down again. The group is brought
//! up with abort-on-first-exit semantics: as soon as any member exits, the
//! composition tool stops the rest, which is what turns a finished client
//! into a finished test run.
//!
//! Every run gets its own compose project name so that concurrent runs never
//! share container names, networks or volumes. The runner never returns an
//! error: callers inspect the captured output, the `timed_out` flag and the
//! exit status instead.

use crate::logging::RunLog;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

/// Grace period passed to `compose up --timeout`, in seconds. When one
/// container exits, the others get this long before they are killed.
const ABORT_GRACE_SECS: u32 = 1;

/// Result of bringing a container group up and waiting for it to finish.
#[derive(Debug)]
pub struct GroupOutcome {
    /// Aggregated standard output and standard error of the group.
    pub output: String,
    /// Whether the group was still running when the timeout fired.
    pub timed_out: bool,
    /// Exit status of the composition tool, if it ran to completion.
    pub exit_status: Option<i32>,
}

/// Compose project name for a test run.
pub fn interop_project(server: &str, client: &str, testname: &str, subnet_index: usize) -> String {
    format!("interop_{}_{}_{}_{}", server, client, testname, subnet_index)
}

/// Compose project name for a compliance probe.
pub fn compliance_project(implementation: &str, subnet_index: usize) -> String {
    format!("compliance_{}_{}", implementation, subnet_index)
}

/// Runs one container group under a fixed compose project name.
pub struct ComposeRunner {
    project: String,
}

impl ComposeRunner {
    pub fn new(project: String) -> Self {
        Self { project }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Bring the group up and wait for it to terminate.
    ///
    /// `containers` is the ordered list of compose service names to start.
    /// The environment entries are passed to the composition tool on top of
    /// the inherited process environment.
    ///
    /// If the group does not terminate within `timeout`, the composition
    /// process is killed and `timed_out` is set; callers are expected to
    /// follow up with [`ComposeRunner::stop`] to let the containers shut
    /// down gracefully. Output captured up to that point is preserved.
    pub async fn up(
        &self,
        env: &[(String, String)],
        containers: &[&str],
        timeout: Duration,
    ) -> GroupOutcome {
        let mut cmd = Command::new("docker");
        cmd.arg("compose")
            .arg("--project-name")
            .arg(&self.project)
            .arg("up")
            .arg("--abort-on-container-exit")
            .arg("--timeout")
            .arg(ABORT_GRACE_SECS.to_string())
            .args(containers)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Starting container group {}: {:?}", self.project, containers);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return GroupOutcome {
                    output: format!("failed to launch the composition tool: {}", e),
                    timed_out: false,
                    exit_status: None,
                }
            }
        };

        // Drain stdout and stderr concurrently while waiting. The readers
        // terminate at EOF, which also happens when the child is killed, so
        // output captured up to a timeout is never lost.
        let stdout_task = tokio::spawn(drain(child.stdout.take()));
        let stderr_task = tokio::spawn(drain(child.stderr.take()));

        let (timed_out, exit_status) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => (false, status.code()),
            Ok(Err(e)) => {
                debug!("Waiting for group {} failed: {}", self.project, e);
                (false, None)
            }
            Err(_) => {
                debug!("Group {} hit its {:?} timeout", self.project, timeout);
                let _ = child.start_kill();
                let _ = child.wait().await;
                (true, None)
            }
        };

        let mut bytes = stdout_task.await.unwrap_or_default();
        bytes.extend(stderr_task.await.unwrap_or_default());

        GroupOutcome {
            output: String::from_utf8_lossy(&bytes).into_owned(),
            timed_out,
            exit_status,
        }
    }

    /// Ask all containers of the group to stop, with a grace period.
    pub async fn stop(&self, grace: Duration) {
        let result = Command::new("docker")
            .arg("compose")
            .arg("--project-name")
            .arg(&self.project)
            .arg("stop")
            .arg("-t")
            .arg(grace.as_secs().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = result {
            debug!("Stopping group {} failed: {}", self.project, e);
        }
    }

    /// Tear the project down, reclaiming its networks and volumes.
    pub async fn down(&self) {
        let result = Command::new("docker")
            .arg("compose")
            .arg("--project-name")
            .arg(&self.project)
            .arg("down")
            .arg("--volumes")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = result {
            debug!("Tearing down group {} failed: {}", self.project, e);
        }
    }

    /// Copy the `/logs` directory out of the named container into `dest`.
    ///
    /// Best-effort: a container that produced no logs or never started only
    /// yields a warning on the run's log, never a failure.
    pub async fn collect_logs(&self, role: &str, dest: &Path, log: &RunLog) {
        // Compose v2 names containers <project>-<service>-<replica>; older
        // releases leave the replica suffix off.
        let candidates = [
            format!("{}-{}-1", self.project, role),
            format!("{}-{}", self.project, role),
        ];
        for container in &candidates {
            let result = Command::new("docker")
                .arg("cp")
                .arg(format!("{}:/logs/.", container))
                .arg(dest)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            if matches!(result, Ok(status) if status.success()) {
                return;
            }
        }
        log.warn(format!(
            "Could not copy logs from container {} of project {}",
            role, self.project
        ));
    }
}

async fn drain(reader: Option<impl tokio::io::AsyncRead + Unpin>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buf).await;
    }
    buf
}
