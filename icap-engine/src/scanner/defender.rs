use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{ScanResult, ScannerError, ThreatScanner};

/// Runs Windows Defender's `MpCmdRun.exe` custom file scan.
#[derive(Debug, Clone)]
pub struct WindowsDefender {
    program: PathBuf,
}

impl WindowsDefender {
    pub const DEFAULT_PATH: &'static str = r"C:\Program Files\Windows Defender\MpCmdRun.exe";

    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for WindowsDefender {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PATH)
    }
}

#[async_trait]
impl ThreatScanner for WindowsDefender {
    async fn scan(&self, content: &[u8]) -> Result<ScanResult, ScannerError> {
        let file = tempfile::Builder::new()
            .prefix("icap-scan-")
            .suffix(".data")
            .tempfile()?;
        tokio::fs::write(file.path(), content).await?;
        info!(path = %file.path().display(), len = content.len(), "scanning with MpCmdRun");

        let program = self.program.display().to_string();
        let output = Command::new(&self.program)
            .args(["-Scan", "-ScanType", "3", "-File"])
            .arg(file.path())
            .arg("-DisableRemediation")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ScannerError::Spawn {
                program: program.clone(),
                source,
            })?;

        // 0: no threats, 2: threats found
        match output.status.code() {
            Some(0 | 2) => {}
            _ => {
                return Err(ScannerError::Failed {
                    program,
                    status: output.status.to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
        }

        let threats = parse_defender_output(&String::from_utf8_lossy(&output.stdout));
        debug!(?threats, "MpCmdRun finished");
        Ok(ScanResult { threats })
    }
}

/// Threat names from `Threat  : <name>` lines of the scan report.
pub fn parse_defender_output(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            let value = value.trim();
            (key.trim() == "Threat" && !value.is_empty()).then(|| value.to_string())
        })
        .collect()
}
