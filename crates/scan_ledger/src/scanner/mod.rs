use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
};

use tokio::process::Command;
use tracing::{info, warn};

use crate::config::ScannerConfig;

/// Characters that must never reach a scanner command line.
const ILLEGAL_FRAGMENTS: &[&str] = &[
    "&", "|", ";", "$", "'", "`", "(", ")", "\"", ">", "<", "\n", "\r",
];

/// Launches a scan of `target_path` whose output ends up in `log_path`.
///
/// `start` returns as soon as the work is dispatched. Completion is only
/// observable through the log: the scanner appends the summary block when it
/// finishes.
pub trait Scanner: Send + Sync {
    fn start(&self, target_path: &Path, log_path: &Path) -> anyhow::Result<()>;
}

/// Runs `clamdscan` (or a configured replacement) as a detached task.
#[derive(Debug, Clone)]
pub struct ClamdScanner {
    program: String,
    args: Vec<String>,
}

impl ClamdScanner {
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
        }
    }

    fn command(&self, target_path: &Path, log_path: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(target_path)
            .arg("-l")
            .arg(log_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        command
    }
}

impl Scanner for ClamdScanner {
    fn start(&self, target_path: &Path, log_path: &Path) -> anyhow::Result<()> {
        let mut command = self.command(target_path, log_path);
        let program = self.program.clone();
        let log_path: PathBuf = log_path.to_path_buf();

        tokio::spawn(async move {
            match command.output().await {
                Ok(output) if output.status.success() => {
                    info!(program = %program, log = %log_path.display(), "scan finished");
                }
                Ok(output) => {
                    // clamdscan exits with 1 when it finds infected files
                    info!(
                        program = %program,
                        log = %log_path.display(),
                        status = ?output.status,
                        stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                        "scan exited"
                    );
                }
                Err(err) => {
                    warn!(error = ?err, program = %program, log = %log_path.display(), "failed to run scanner");
                }
            }
        });

        Ok(())
    }
}

pub fn from_config(config: &ScannerConfig) -> Arc<dyn Scanner> {
    Arc::new(ClamdScanner::new(config))
}

/// True when `arg` contains shell metacharacters or line breaks.
pub fn check_illegal(arg: &str) -> bool {
    ILLEGAL_FRAGMENTS
        .iter()
        .any(|fragment| arg.contains(fragment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::{sleep, timeout};

    #[test]
    fn rejects_shell_metacharacters() {
        assert!(!check_illegal("/srv/www"));
        assert!(!check_illegal("/srv/my files/uploads"));
        for path in [
            "/srv; rm -rf /",
            "/srv && id",
            "/srv | cat",
            "$(id)",
            "`id`",
            "/srv'",
            "/srv\"",
            "/srv > /tmp/x",
            "/srv\nid",
        ] {
            assert!(check_illegal(path), "{path:?} should be illegal");
        }
    }

    #[test]
    fn command_line_matches_scanner_contract() {
        let scanner = ClamdScanner::new(&ScannerConfig::default());
        let command = scanner.command(Path::new("/srv/www"), Path::new("/data/log"));
        let std_command = command.as_std();

        assert_eq!(std_command.get_program(), "clamdscan");
        let args: Vec<_> = std_command
            .get_args()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect();
        assert_eq!(args, vec!["--fdpass", "/srv/www", "-l", "/data/log"]);
    }

    #[tokio::test]
    async fn start_returns_before_the_scan_completes() {
        let tmp = TempDir::new().expect("tempdir");
        let log_path = tmp.path().join("20240103120000");
        // sh -c <script> <target> -l <log>: $0 is the target, $2 the log
        let scanner = ClamdScanner::new(&ScannerConfig {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "sleep 0.2; echo done > \"$2\"".to_string(),
            ],
        });

        scanner.start(tmp.path(), &log_path).unwrap();
        assert!(!log_path.exists());

        timeout(Duration::from_secs(5), async {
            while !log_path.exists() {
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("scanner should write its log");
    }

    #[tokio::test]
    async fn missing_program_does_not_fail_dispatch() {
        let tmp = TempDir::new().expect("tempdir");
        let scanner = ClamdScanner::new(&ScannerConfig {
            program: "/nonexistent/clamdscan".to_string(),
            args: vec![],
        });

        assert!(scanner.start(tmp.path(), &tmp.path().join("log")).is_ok());
    }
}
