//! Use cases over scan targets and their run history.
//!
//! Target definitions come from the [`TargetStore`](crate::targets::TargetStore)
//! and run history from the result directory tree. The two are joined only
//! here, by target name, with no transaction spanning both.

use std::path::Path;

use anyhow::anyhow;
use chrono::Utc;
use serde::Serialize;
use tokio::task;
use tracing::{info, warn};

use crate::{
    error::{ServiceError, ServiceResult},
    records::{self, RecordPage, TimeRange},
    scanner,
    state::AppContext,
    targets::{ScanTarget, TargetDraft, TargetWrite},
};

const NO_RUN_YET: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetRef {
    Id(u64),
    Name(String),
}

/// Target listing entry with the start time of its latest run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetInfo {
    #[serde(flatten)]
    pub target: ScanTarget,
    pub last_handle_date: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    pub target: TargetRef,
    pub page: usize,
    pub page_size: usize,
    pub range: TimeRange,
}

pub async fn search(
    ctx: &AppContext,
    page: usize,
    page_size: usize,
    info: Option<&str>,
) -> ServiceResult<(usize, Vec<TargetInfo>)> {
    if page == 0 {
        return Err(ServiceError::InvalidPage);
    }
    let (total, targets) = ctx.targets().page(page, page_size, info).await?;

    let config = ctx.config();
    let data_dir = config.data_dir.clone();
    let time_zone = config.scan.time_zone;
    drop(config);

    let items: Vec<TargetInfo> = blocking(move || {
        targets
            .into_iter()
            .map(|target| {
                let last_handle_date = records::latest_run_id(&data_dir, &target.name)
                    .and_then(|run_id| records::display_run_date(&run_id, time_zone))
                    .unwrap_or_else(|| NO_RUN_YET.to_string());
                TargetInfo {
                    target,
                    last_handle_date,
                }
            })
            .collect()
    })
    .await?;

    Ok((total, items))
}

pub async fn create(ctx: &AppContext, draft: TargetDraft) -> ServiceResult<ScanTarget> {
    validate_name(&draft.name)?;
    let name = draft.name.clone();
    let target = saved(ctx.targets().create(draft).await?, name)?;
    info!(name = %target.name, id = target.id, "scan target created");
    Ok(target)
}

/// Replace a target's definition.
///
/// Renaming keeps the run history under the old name; it no longer shows up
/// for this target.
pub async fn update(ctx: &AppContext, id: u64, draft: TargetDraft) -> ServiceResult<ScanTarget> {
    validate_name(&draft.name)?;
    let store = ctx.targets();
    let current = store.get_by_id(id).await?.ok_or(ServiceError::NotFound)?;
    let name = draft.name.clone();
    let updated = saved(store.update(id, draft).await?, name)?;

    if current.name != updated.name {
        let data_dir = ctx.config().data_dir.clone();
        let old_name = current.name.clone();
        let orphaned =
            blocking(move || records::target_dir(&data_dir, &old_name).exists()).await?;
        if orphaned {
            warn!(
                id,
                from = %current.name,
                to = %updated.name,
                "renamed target leaves its scan history behind"
            );
        }
    }

    Ok(updated)
}

/// Delete targets. A single id must exist; a batch removes whatever matches.
/// Run history is left on disk.
pub async fn delete(ctx: &AppContext, ids: &[u64]) -> ServiceResult<()> {
    let store = ctx.targets();
    if let [id] = ids
        && store.get_by_id(*id).await?.is_none()
    {
        return Err(ServiceError::NotFound);
    }

    let removed = store.delete(ids).await?;
    info!(requested = ids.len(), removed, "scan targets deleted");
    Ok(())
}

/// Start one scan of the target and return the new run id.
///
/// The scan runs in the background; its progress is only visible through
/// [`load_records`].
pub async fn handle_once(ctx: &AppContext, id: u64) -> ServiceResult<String> {
    let target = resolve(ctx, &TargetRef::Id(id)).await?;
    if scanner::check_illegal(&target.path) {
        return Err(ServiceError::IllegalPath);
    }

    let config = ctx.config();
    let run_id = records::new_run_id(Utc::now(), config.scan.time_zone);
    let data_dir = config.data_dir.clone();
    drop(config);

    let log_path = {
        let name = target.name.clone();
        let run_id = run_id.clone();
        blocking(move || {
            records::ensure_target_dir(&data_dir, &name)?;
            anyhow::Ok(records::run_log_path(&data_dir, &name, &run_id))
        })
        .await??
    };

    ctx.scanner().start(Path::new(&target.path), &log_path)?;
    info!(name = %target.name, run_id = %run_id, path = %target.path, "scan dispatched");
    Ok(run_id)
}

pub async fn load_records(ctx: &AppContext, query: RecordQuery) -> ServiceResult<RecordPage> {
    if query.page == 0 {
        return Err(ServiceError::InvalidPage);
    }
    let target = resolve(ctx, &query.target).await?;

    let config = ctx.config();
    let data_dir = config.data_dir.clone();
    let time_zone = config.scan.time_zone;
    drop(config);

    blocking(move || {
        records::query_records(
            &data_dir,
            &target.name,
            time_zone,
            &query.range,
            query.page,
            query.page_size,
        )
    })
    .await
}

/// Drop every run log of the target.
pub async fn clean_records(ctx: &AppContext, id: u64) -> ServiceResult<()> {
    let target = resolve(ctx, &TargetRef::Id(id)).await?;
    let data_dir = ctx.config().data_dir.clone();
    let name = target.name.clone();
    blocking(move || records::clear_records(&data_dir, &name)).await??;
    info!(name = %target.name, "scan records cleared");
    Ok(())
}

async fn resolve(ctx: &AppContext, target: &TargetRef) -> ServiceResult<ScanTarget> {
    let store = ctx.targets();
    let found = match target {
        TargetRef::Id(id) => store.get_by_id(*id).await?,
        TargetRef::Name(name) => store.get_by_name(name).await?,
    };
    found.ok_or(ServiceError::NotFound)
}

fn saved(write: TargetWrite, name: String) -> ServiceResult<ScanTarget> {
    match write {
        TargetWrite::Saved(target) => Ok(target),
        TargetWrite::Missing => Err(ServiceError::NotFound),
        TargetWrite::NameTaken => Err(ServiceError::RecordExist(name)),
    }
}

fn validate_name(name: &str) -> ServiceResult<()> {
    let reason = if name.trim().is_empty() {
        "must not be empty"
    } else if name == "." || name == ".." {
        "must not be a relative directory"
    } else if name.contains(['/', '\\', '\0']) {
        "must not contain path separators"
    } else {
        return Ok(());
    };

    Err(ServiceError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

async fn blocking<T, F>(op: F) -> ServiceResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(op)
        .await
        .map_err(|err| ServiceError::Storage(anyhow!("blocking task failed: {err}")))
}
