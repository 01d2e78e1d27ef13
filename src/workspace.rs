//! # Workspace Manager
//!
//! Each test run owns a workspace of six ephemeral directories: the files
//! the server will serve (`www`), the client's download target, the
//! certificate chain, and one log directory per container role. The
//! directories are temporary and are released on every exit path; on a
//! terminal verdict the log directories and the run's buffered output are
//! promoted into the persistent log tree first.

use crate::logging::RunLog;
use crate::utils::copy_dir_all;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;

/// Per-run temporary directory tree.
#[derive(Debug)]
pub struct Workspace {
    www: TempDir,
    downloads: TempDir,
    certs: TempDir,
    sim_logs: TempDir,
    client_logs: TempDir,
    server_logs: TempDir,
}

fn temp_dir(prefix: &str) -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .with_context(|| format!("failed to create temporary {} directory", prefix))
}

impl Workspace {
    /// Create a fresh workspace. Any failure here is a setup error that is
    /// fatal to the run.
    pub fn new() -> Result<Self> {
        Ok(Self {
            www: temp_dir("www_")?,
            downloads: temp_dir("downloads_")?,
            certs: temp_dir("certs_")?,
            sim_logs: temp_dir("logs_sim_")?,
            client_logs: temp_dir("logs_client_")?,
            server_logs: temp_dir("logs_server_")?,
        })
    }

    pub fn www_dir(&self) -> &Path {
        self.www.path()
    }

    pub fn download_dir(&self) -> &Path {
        self.downloads.path()
    }

    pub fn certs_dir(&self) -> &Path {
        self.certs.path()
    }

    pub fn sim_log_dir(&self) -> &Path {
        self.sim_logs.path()
    }

    pub fn client_log_dir(&self) -> &Path {
        self.client_logs.path()
    }

    pub fn server_log_dir(&self) -> &Path {
        self.server_logs.path()
    }

    /// The client's TLS keylog file, if the implementation wrote one.
    pub fn client_keylog(&self) -> PathBuf {
        self.client_logs.path().join("keys.log")
    }

    /// The server's TLS keylog file, if the implementation wrote one.
    pub fn server_keylog(&self) -> PathBuf {
        self.server_logs.path().join("keys.log")
    }

    /// Generate the certificate chain by invoking the external `certs.sh`
    /// script. A non-zero exit is a fatal setup error.
    pub async fn generate_certs(&self, chain_length: u32, log: &RunLog) -> Result<()> {
        let output = Command::new("./certs.sh")
            .arg(self.certs.path())
            .arg(chain_length.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("failed to run certs.sh")?;
        log.debug(String::from_utf8_lossy(&output.stdout).into_owned());
        if !output.status.success() {
            log.debug(String::from_utf8_lossy(&output.stderr).into_owned());
            bail!("certs.sh exited with {:?}", output.status.code());
        }
        Ok(())
    }

    /// Promote the run's logs into the persistent tree at `dest`.
    ///
    /// Copies the server, client and sim log directories and writes the
    /// buffered run records as `output.txt`. With `preserve_files` set, the
    /// `www` and `downloads` directories are preserved as well so that a
    /// failed transfer can be diagnosed offline.
    pub fn promote(&self, dest: &Path, log: &RunLog, preserve_files: bool) -> Result<()> {
        copy_dir_all(self.server_logs.path(), &dest.join("server"))?;
        copy_dir_all(self.client_logs.path(), &dest.join("client"))?;
        copy_dir_all(self.sim_logs.path(), &dest.join("sim"))?;
        log.write_to(&dest.join("output.txt"))
            .context("failed to write output.txt")?;
        if preserve_files {
            copy_dir_all(self.www.path(), &dest.join("www"))?;
            if let Err(e) = copy_dir_all(self.downloads.path(), &dest.join("downloads")) {
                log.info(format!("Could not copy downloaded files: {:#}", e));
            }
        }
        Ok(())
    }
}
