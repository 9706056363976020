use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{ScanResult, ScannerError, ThreatScanner};

/// Runs `clamscan --no-summary` on a temporary copy of the content.
#[derive(Debug, Clone)]
pub struct ClamScan {
    program: PathBuf,
}

impl ClamScan {
    pub const DEFAULT_PATH: &'static str = "/usr/bin/clamscan";

    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for ClamScan {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PATH)
    }
}

#[async_trait]
impl ThreatScanner for ClamScan {
    async fn scan(&self, content: &[u8]) -> Result<ScanResult, ScannerError> {
        let file = tempfile::Builder::new()
            .prefix("icap-scan-")
            .suffix(".data")
            .tempfile()?;
        tokio::fs::write(file.path(), content).await?;
        info!(path = %file.path().display(), len = content.len(), "scanning with clamscan");

        let program = self.program.display().to_string();
        let output = Command::new(&self.program)
            .arg("--no-summary")
            .arg(file.path())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ScannerError::Spawn {
                program: program.clone(),
                source,
            })?;

        // 0: clean, 1: threat found, anything else: scanner error
        match output.status.code() {
            Some(0 | 1) => {}
            _ => {
                return Err(ScannerError::Failed {
                    program,
                    status: output.status.to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
        }

        let threats = parse_clamscan_output(&String::from_utf8_lossy(&output.stdout));
        debug!(?threats, "clamscan finished");
        Ok(ScanResult { threats })
    }
}

/// Threat names from `<path>: <name> FOUND` lines.
pub fn parse_clamscan_output(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.trim_end().strip_suffix("FOUND")?;
            if !rest.ends_with(char::is_whitespace) {
                return None;
            }
            let name = rest.trim_end().rsplit(char::is_whitespace).next()?;
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/tmp/x/threat.data: Win.Test.EICAR_HDB-1 FOUND\n", vec!["Win.Test.EICAR_HDB-1"])]
    #[case("/tmp/x/threat.data: OK\n", vec![])]
    #[case("", vec![])]
    #[case("a: One FOUND\nb: OK\nc: Two FOUND\r\n", vec!["One", "Two"])]
    #[case("/tmp/NOTFOUND\n", vec![])]
    fn parses_found_lines(#[case] output: &str, #[case] expected: Vec<&str>) {
        assert_eq!(parse_clamscan_output(output), expected);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let scanner = ClamScan::new("/nonexistent/clamscan");
        let err = scanner.scan(b"data").await.unwrap_err();
        assert!(matches!(err, ScannerError::Spawn { .. }), "{err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_one_without_found_lines_is_clean() {
        let scanner = ClamScan::new("false");
        let res = scanner.scan(b"data").await.expect("exit 1 is not a failure");
        assert!(res.is_clean());
    }
}
