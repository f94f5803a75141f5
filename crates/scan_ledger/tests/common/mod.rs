use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Result;
use scan_ledger::{
    config::AppConfig,
    records::SUMMARY_MARKER,
    scanner::Scanner,
    server::{self, ServerState},
    state::AppContext,
    targets::FileTargetStore,
};
use tokio::{net::TcpListener, task::JoinHandle, time::sleep};

/// Writes a partial log at once and the summary block after `delay`, the way
/// a real scanner fills its log while it runs.
pub struct DelayedScanner {
    pub delay: Duration,
}

impl Scanner for DelayedScanner {
    fn start(&self, target_path: &Path, log_path: &Path) -> Result<()> {
        let partial = format!("{}: OK\n", target_path.join("index.php").display());
        fs::write(log_path, &partial)?;

        let delay = self.delay;
        let log_path: PathBuf = log_path.to_path_buf();
        tokio::spawn(async move {
            sleep(delay).await;
            let complete = format!(
                "{partial}\n----------- {SUMMARY_MARKER} -----------\nInfected files: 0\nTime: 0.412 sec (0 m 0 s)\nStart Date: 2024:01:03 12:00:00\n"
            );
            let _ = tokio::fs::write(&log_path, complete).await;
        });
        Ok(())
    }
}

pub struct RunningServer {
    pub ctx: AppContext,
    pub base_url: String,
    pub task: JoinHandle<Result<()>>,
}

pub async fn boot(root: &Path, scanner: Arc<dyn Scanner>) -> Result<RunningServer> {
    let config = AppConfig::from_root(root, "127.0.0.1:0")?;
    let store = FileTargetStore::open(&config.data_dir)?;
    let ctx = AppContext::new(config, Arc::new(store), scanner);

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let task = tokio::spawn(server::serve_with_listener(
        listener,
        ServerState::new(ctx.clone()),
    ));

    Ok(RunningServer {
        ctx,
        base_url: format!("http://{}", addr),
        task,
    })
}
