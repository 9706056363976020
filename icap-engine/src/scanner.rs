//! Threat scanner collaborators used by the `virus_scan` service.
//!
//! A scanner receives the raw bytes of one HTTP body and reports the threat
//! names it found. Two process-backed implementations are provided:
//! [`ClamScan`] (`clamscan`) and [`WindowsDefender`] (`MpCmdRun.exe`).
//! [`platform_default`] picks the one matching the host OS.

mod clamav;
mod defender;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use clamav::{ClamScan, parse_clamscan_output};
pub use defender::{WindowsDefender, parse_defender_output};

/// Outcome of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Threat names in the order the scanner reported them.
    pub threats: Vec<String>,
}

impl ScanResult {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn is_clean(&self) -> bool {
        self.threats.is_empty()
    }

    /// First reported threat; the only one surfaced in responses.
    pub fn threat_name(&self) -> Option<&str> {
        self.threats.first().map(String::as_str)
    }
}

/// Failures of a scanner collaborator.
#[derive(Error, Debug)]
pub enum ScannerError {
    #[error("scanner I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

/// Async threat scanner.
#[async_trait]
pub trait ThreatScanner: Send + Sync + std::fmt::Debug {
    /// Scan one body; an empty result means clean.
    async fn scan(&self, content: &[u8]) -> Result<ScanResult, ScannerError>;
}

/// Scanner for the host OS: Windows Defender on Windows, `clamscan` elsewhere.
pub fn platform_default(clamscan: impl Into<PathBuf>) -> Arc<dyn ThreatScanner> {
    if cfg!(windows) {
        Arc::new(WindowsDefender::default())
    } else {
        Arc::new(ClamScan::new(clamscan))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_threat_wins() {
        let r = ScanResult {
            threats: vec!["A".into(), "B".into()],
        };
        assert_eq!(r.threat_name(), Some("A"));
        assert!(!r.is_clean());
        assert!(ScanResult::clean().is_clean());
    }

    #[cfg(not(windows))]
    #[test]
    fn platform_default_is_clamscan_off_windows() {
        let s = platform_default("/opt/clamav/bin/clamscan");
        assert!(format!("{s:?}").contains("ClamScan"));
    }
}
