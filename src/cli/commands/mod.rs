//! CLI command implementations

pub mod config;
pub mod expire_locks;
pub mod list;
pub mod register;
pub mod release;
pub mod retain;

pub use config::execute as config;
pub use expire_locks::execute as expire_locks;
pub use list::execute as list;
pub use register::execute as register;
pub use release::execute as release;
pub use retain::execute as retain;

use crate::config::Config;
use crate::error::{PkgCacheError, PkgCacheResult};
use crate::journal::{DeploymentTaskId, PackageJournal, TASK_ID_ENV};
use std::path::{Path, PathBuf};

/// Run blocking journal work off the async runtime
async fn run_blocking<T, F>(config: &Config, work: F) -> PkgCacheResult<T>
where
    T: Send + 'static,
    F: FnOnce(PackageJournal) -> PkgCacheResult<T> + Send + 'static,
{
    let journal = PackageJournal::from_config(config);
    tokio::task::spawn_blocking(move || work(journal))
        .await
        .map_err(|e| PkgCacheError::Internal(format!("journal task failed: {}", e)))?
}

/// Task from `--task`, falling back to the environment
fn resolve_task(arg: Option<String>) -> PkgCacheResult<DeploymentTaskId> {
    arg.filter(|t| !t.trim().is_empty())
        .map(|t| DeploymentTaskId::new(t.trim()))
        .or_else(DeploymentTaskId::from_env)
        .ok_or_else(|| {
            PkgCacheError::User(format!(
                "No deployment task given; pass --task or set {}",
                TASK_ID_ENV
            ))
        })
}

fn absolute(path: &Path) -> PkgCacheResult<PathBuf> {
    std::path::absolute(path)
        .map_err(|e| PkgCacheError::io(format!("resolving {}", path.display()), e))
}
