use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task;

use crate::records::page_window;

const TARGETS_FILE: &str = "targets.json";

/// A named filesystem path the user wants scanned.
///
/// Run history lives under the target's `name`, so renaming a target leaves
/// its earlier runs behind in the old directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanTarget {
    pub id: u64,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDraft {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub description: String,
}

/// Result of a write that keeps target names unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetWrite {
    Saved(ScanTarget),
    Missing,
    NameTaken,
}

/// Keyed store of target definitions.
///
/// Names are unique: `create` and `update` check for a clash and write in one
/// step.
#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn get_by_id(&self, id: u64) -> anyhow::Result<Option<ScanTarget>>;
    async fn get_by_name(&self, name: &str) -> anyhow::Result<Option<ScanTarget>>;
    async fn create(&self, draft: TargetDraft) -> anyhow::Result<TargetWrite>;
    /// `Missing` when no target has `id`.
    async fn update(&self, id: u64, draft: TargetDraft) -> anyhow::Result<TargetWrite>;
    /// Returns how many of `ids` were removed.
    async fn delete(&self, ids: &[u64]) -> anyhow::Result<usize>;
    /// Newest-first page of targets whose name contains `name_like`.
    async fn page(
        &self,
        page: usize,
        page_size: usize,
        name_like: Option<&str>,
    ) -> anyhow::Result<(usize, Vec<ScanTarget>)>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct TargetTable {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    targets: Vec<ScanTarget>,
}

impl TargetTable {
    fn name_taken(&self, name: &str, except: Option<u64>) -> bool {
        self.targets
            .iter()
            .any(|target| target.name == name && Some(target.id) != except)
    }
}

/// Target store persisted as `<data_dir>/targets.json`.
///
/// The table is held in memory and rewritten in full on every change. Writes
/// run on the blocking pool.
#[derive(Debug, Clone)]
pub struct FileTargetStore {
    file: Arc<TableFile>,
}

#[derive(Debug)]
struct TableFile {
    path: PathBuf,
    table: RwLock<TargetTable>,
}

impl FileTargetStore {
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let path = data_dir.join(TARGETS_FILE);
        let table = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("parsing target table {:?}", path))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => TargetTable::default(),
            Err(err) => {
                return Err(err).with_context(|| format!("reading target table {:?}", path));
            }
        };

        Ok(Self {
            file: Arc::new(TableFile {
                path,
                table: RwLock::new(table),
            }),
        })
    }

    async fn write<T, F>(&self, change: F) -> anyhow::Result<T>
    where
        F: FnOnce(&mut TargetTable) -> T + Send + 'static,
        T: Send + 'static,
    {
        let file = Arc::clone(&self.file);
        task::spawn_blocking(move || file.mutate(change))
            .await
            .context("target store write task failed")?
    }
}

impl TableFile {
    fn persist(&self, table: &TargetTable) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating target table dir {:?}", parent))?;
        }
        let serialized = serde_json::to_vec_pretty(table).context("serializing target table")?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, serialized)
            .with_context(|| format!("writing target table {:?}", staging))?;
        fs::rename(&staging, &self.path)
            .with_context(|| format!("replacing target table {:?}", self.path))?;
        Ok(())
    }

    /// Apply `change` to a copy of the table and swap it in once it is on disk.
    /// An unchanged table is not rewritten.
    fn mutate<T>(&self, change: impl FnOnce(&mut TargetTable) -> T) -> anyhow::Result<T> {
        let mut table = self.table.write();
        let mut next = table.clone();
        let output = change(&mut next);
        if next != *table {
            self.persist(&next)?;
            *table = next;
        }
        Ok(output)
    }
}

#[async_trait]
impl TargetStore for FileTargetStore {
    async fn get_by_id(&self, id: u64) -> anyhow::Result<Option<ScanTarget>> {
        let table = self.file.table.read();
        Ok(table.targets.iter().find(|target| target.id == id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> anyhow::Result<Option<ScanTarget>> {
        let table = self.file.table.read();
        Ok(table
            .targets
            .iter()
            .find(|target| target.name == name)
            .cloned())
    }

    async fn create(&self, draft: TargetDraft) -> anyhow::Result<TargetWrite> {
        self.write(move |table| {
            if table.name_taken(&draft.name, None) {
                return TargetWrite::NameTaken;
            }
            table.next_id += 1;
            let now = Utc::now();
            let target = ScanTarget {
                id: table.next_id,
                name: draft.name,
                path: draft.path,
                description: draft.description,
                created_at: now,
                updated_at: now,
            };
            table.targets.push(target.clone());
            TargetWrite::Saved(target)
        })
        .await
    }

    async fn update(&self, id: u64, draft: TargetDraft) -> anyhow::Result<TargetWrite> {
        self.write(move |table| {
            if table.name_taken(&draft.name, Some(id)) {
                return TargetWrite::NameTaken;
            }
            let Some(target) = table.targets.iter_mut().find(|target| target.id == id) else {
                return TargetWrite::Missing;
            };
            target.name = draft.name;
            target.path = draft.path;
            target.description = draft.description;
            target.updated_at = Utc::now();
            TargetWrite::Saved(target.clone())
        })
        .await
    }

    async fn delete(&self, ids: &[u64]) -> anyhow::Result<usize> {
        let ids = ids.to_vec();
        self.write(move |table| {
            let before = table.targets.len();
            table.targets.retain(|target| !ids.contains(&target.id));
            before - table.targets.len()
        })
        .await
    }

    async fn page(
        &self,
        page: usize,
        page_size: usize,
        name_like: Option<&str>,
    ) -> anyhow::Result<(usize, Vec<ScanTarget>)> {
        let table = self.file.table.read();
        let mut matching: Vec<&ScanTarget> = table
            .targets
            .iter()
            .filter(|target| name_like.is_none_or(|needle| target.name.contains(needle)))
            .collect();
        matching.sort_by(|a, b| b.id.cmp(&a.id));

        let items = page_window(&matching, page, page_size)
            .iter()
            .map(|target| (*target).clone())
            .collect();
        Ok((matching.len(), items))
    }
}
