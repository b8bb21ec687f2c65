//! Journal persistence
//!
//! Pure file I/O. Callers hold the journal lock around load-modify-save.

use crate::error::{PkgCacheError, PkgCacheResult};
use crate::journal::model::{Journal, JOURNAL_SCHEMA_VERSION};
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Loads and stores the journal document
pub trait JournalRepository: Send + Sync {
    /// Location of the journal file
    fn path(&self) -> &Path;

    /// Read the journal; a missing file is an empty journal
    fn load(&self) -> PkgCacheResult<Journal>;

    /// Replace the journal atomically
    fn save(&self, journal: &Journal) -> PkgCacheResult<()>;

    /// Copy the current file aside before it gets overwritten
    fn backup_corrupt(&self) -> PkgCacheResult<PathBuf>;
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

/// JSON file repository
#[derive(Debug, Clone)]
pub struct JsonJournalRepository {
    path: PathBuf,
}

impl JsonJournalRepository {
    /// Repository for the journal at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parse(&self, content: &[u8]) -> PkgCacheResult<Journal> {
        let corrupt = |e: serde_json::Error| PkgCacheError::JournalCorrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        };

        let probe: VersionProbe = serde_json::from_slice(content).map_err(corrupt)?;
        if probe.version > JOURNAL_SCHEMA_VERSION {
            return Err(PkgCacheError::JournalVersionUnsupported {
                path: self.path.clone(),
                found: probe.version,
                supported: JOURNAL_SCHEMA_VERSION,
            });
        }

        serde_json::from_slice(content).map_err(corrupt)
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "journal".to_string());
        self.path
            .with_file_name(format!("{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()))
    }
}

impl JournalRepository for JsonJournalRepository {
    fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> PkgCacheResult<Journal> {
        // Bytes, so invalid UTF-8 surfaces as a corrupt document
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No journal at {}, starting empty", self.path.display());
                return Ok(Journal::default());
            }
            Err(e) => {
                return Err(PkgCacheError::io(
                    format!("reading journal {}", self.path.display()),
                    e,
                ))
            }
        };

        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(Journal::default());
        }

        self.parse(&content)
    }

    fn save(&self, journal: &Journal) -> PkgCacheResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                PkgCacheError::io(format!("creating journal directory {}", parent.display()), e)
            })?;
        }

        let json = serde_json::to_vec_pretty(journal)?;
        let tmp = self.temp_path();

        let written = File::create(&tmp).and_then(|mut file| {
            file.write_all(&json)?;
            file.sync_all()
        });
        let result = written.and_then(|()| fs::rename(&tmp, &self.path));

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(PkgCacheError::io(
                format!("writing journal {}", self.path.display()),
                e,
            ));
        }

        debug!(
            "Saved journal with {} entries to {}",
            journal.len(),
            self.path.display()
        );
        Ok(())
    }

    fn backup_corrupt(&self) -> PkgCacheResult<PathBuf> {
        let mut backup = self.path.clone().into_os_string();
        backup.push(".corrupt");
        let backup = PathBuf::from(backup);

        fs::copy(&self.path, &backup).map_err(|e| {
            PkgCacheError::io(format!("backing up journal to {}", backup.display()), e)
        })?;
        Ok(backup)
    }
}
