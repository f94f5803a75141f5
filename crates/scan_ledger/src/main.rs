use std::sync::Arc;

use scan_ledger::{
    config, scanner,
    server::{self, ServerState},
    state::AppContext,
    targets::FileTargetStore,
};
use tracing::error;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::init_tracing();
    let config = config::AppConfig::load()?;
    let targets = FileTargetStore::open(&config.data_dir)?;
    let scanner = scanner::from_config(&config.scan.scanner);
    let ctx = AppContext::new(config, Arc::new(targets), scanner);

    let server_state = ServerState::new(ctx.clone());
    let server_task = tokio::spawn(async move {
        if let Err(err) = server::serve(server_state).await {
            error!(error = ?err, "server error");
        }
    });

    tokio::signal::ctrl_c().await?;
    ctx.request_shutdown();

    let _ = server_task.await;

    Ok(())
}
