//! # Trace Query Interface
//!
//! Test case checks ask questions about the packet traces the network
//! simulator recorded: how many handshakes happened, which QUIC versions
//! appeared, whether a Retry token was used. This module answers those
//! questions by driving a `tshark` subprocess with a display filter and a
//! field list; the rest of the harness treats it as an opaque query
//! interface and never looks at pcap bytes itself.

use crate::subnet::AddressBundle;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("failed to run tshark: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("tshark exited with {status:?}: {stderr}")]
    Tshark { status: Option<i32>, stderr: String },
}

/// Packet direction relative to the run's address plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    All,
    FromClient,
    FromServer,
}

/// Fields extracted for one QUIC packet.
///
/// Every field is optional because tshark leaves columns empty when a
/// packet does not carry them.
#[derive(Debug, Clone, Default)]
pub struct QuicPacket {
    pub time: f64,
    pub version: Option<String>,
    pub scid: Option<String>,
    pub dcid: Option<String>,
    pub token_length: Option<u64>,
    pub token: Option<String>,
    pub retry_token: Option<String>,
}

/// ECN codepoint counts over a set of packets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EcnCounts {
    pub not_ect: usize,
    pub ect0: usize,
    pub ect1: usize,
    pub ce: usize,
}

/// Normalize a version string the way the checks compare them: parse the
/// number and re-render it as minimal hex, so `0x00000001` becomes `0x1`.
pub fn normalize_version(raw: &str) -> Option<String> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(digits, 16)
        .ok()
        .map(|v| format!("{:#x}", v))
}

/// Query handle bound to one pcap file, an optional keylog and the run's
/// address plan.
#[derive(Debug, Clone)]
pub struct TraceAnalyzer {
    pcap: PathBuf,
    keylog: Option<PathBuf>,
    addrs: AddressBundle,
}

impl TraceAnalyzer {
    pub fn new(pcap: PathBuf, keylog: Option<PathBuf>, addrs: AddressBundle) -> Self {
        Self {
            pcap,
            keylog,
            addrs,
        }
    }

    pub fn pcap_path(&self) -> &Path {
        &self.pcap
    }

    fn direction_filter(&self, direction: Direction) -> String {
        let base = "(quic && !icmp)";
        match direction {
            Direction::All => base.to_string(),
            Direction::FromClient => format!(
                "{} && (ip.src=={} || ipv6.src=={})",
                base, self.addrs.client_addr_v4, self.addrs.client_addr_v6
            ),
            Direction::FromServer => format!(
                "{} && (ip.src=={} || ipv6.src=={})",
                base, self.addrs.server_addr_v4, self.addrs.server_addr_v6
            ),
        }
    }

    /// Run tshark with `filter` and extract `fields`, one row per packet.
    fn fields(&self, filter: &str, fields: &[&str]) -> Result<Vec<Vec<String>>, TraceError> {
        let mut cmd = Command::new("tshark");
        cmd.arg("-r")
            .arg(&self.pcap)
            .arg("-d")
            .arg("udp.port==443,quic")
            .arg("--disable-protocol")
            .arg("http3")
            .arg("-Y")
            .arg(filter)
            .arg("-T")
            .arg("fields")
            .arg("-E")
            .arg("separator=/t")
            .arg("-E")
            .arg("occurrence=f");
        if let Some(keylog) = &self.keylog {
            cmd.arg("-o")
                .arg(format!("tls.keylog_file:{}", keylog.display()));
        }
        for field in fields {
            cmd.arg("-e").arg(field);
        }

        let output = cmd.output()?;
        if !output.status.success() {
            return Err(TraceError::Tshark {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|line| line.split('\t').map(str::to_string).collect())
            .collect())
    }

    fn packets(&self, filter: &str) -> Result<Vec<QuicPacket>, TraceError> {
        let rows = self.fields(
            filter,
            &[
                "frame.time_epoch",
                "quic.version",
                "quic.scid",
                "quic.dcid",
                "quic.token_length",
                "quic.token",
                "quic.retry_token",
            ],
        )?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let cell = |i: usize| -> Option<String> {
                    row.get(i).filter(|s| !s.is_empty()).cloned()
                };
                QuicPacket {
                    time: cell(0).and_then(|t| t.parse().ok()).unwrap_or(0.0),
                    version: cell(1),
                    scid: cell(2),
                    dcid: cell(3),
                    token_length: cell(4).and_then(|t| t.parse().ok()),
                    token: cell(5),
                    retry_token: cell(6),
                }
            })
            .collect())
    }

    /// All Initial packets in `direction`.
    pub fn initials(&self, direction: Direction) -> Result<Vec<QuicPacket>, TraceError> {
        let filter = format!(
            "{} && quic.long.packet_type==0",
            self.direction_filter(direction)
        );
        self.packets(&filter)
    }

    /// All Retry packets in `direction`.
    pub fn retries(&self, direction: Direction) -> Result<Vec<QuicPacket>, TraceError> {
        let filter = format!(
            "{} && quic.long.packet_type==3",
            self.direction_filter(direction)
        );
        self.packets(&filter)
    }

    /// All Version Negotiation packets.
    pub fn version_negotiations(&self) -> Result<Vec<QuicPacket>, TraceError> {
        let filter = format!("{} && quic.version==0", self.direction_filter(Direction::All));
        self.packets(&filter)
    }

    /// Number of 0-RTT packets in `direction`.
    pub fn zero_rtt_count(&self, direction: Direction) -> Result<usize, TraceError> {
        let filter = format!(
            "{} && quic.long.packet_type==1",
            self.direction_filter(direction)
        );
        Ok(self.packets(&filter)?.len())
    }

    /// Capture timestamps of all 1-RTT packets in `direction`, in epoch
    /// seconds. Used by the goodput computation.
    pub fn one_rtt_times(&self, direction: Direction) -> Result<Vec<f64>, TraceError> {
        let filter = format!(
            "{} && quic.header_form==0",
            self.direction_filter(direction)
        );
        let rows = self.fields(&filter, &["frame.time_epoch"])?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.first().and_then(|t| t.parse().ok()))
            .collect())
    }

    /// ECN codepoint counts over all QUIC packets in `direction`.
    pub fn ecn_counts(&self, direction: Direction) -> Result<EcnCounts, TraceError> {
        let rows = self.fields(
            &self.direction_filter(direction),
            &["ip.dsfield.ecn", "ipv6.tclass.ecn"],
        )?;
        let mut counts = EcnCounts::default();
        for row in rows {
            let mark = row
                .iter()
                .find(|cell| !cell.is_empty())
                .and_then(|cell| {
                    let digits = cell.strip_prefix("0x").unwrap_or(cell);
                    u8::from_str_radix(digits, 16).ok()
                })
                .unwrap_or(0);
            match mark {
                1 => counts.ect1 += 1,
                2 => counts.ect0 += 1,
                3 => counts.ce += 1,
                _ => counts.not_ect += 1,
            }
        }
        Ok(counts)
    }
}
