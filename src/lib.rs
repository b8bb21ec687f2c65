//! pkgcache - package retention journal for deployment agents
//!
//! Tracks which deployment tasks are using which cached packages and evicts
//! the least valuable unused packages when the cache grows too large. The
//! journal is shared between agent processes on one machine and every
//! change to it happens under a cross-process lock.

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod journal;
pub mod lock;
pub mod retention;
pub mod ui;

pub use error::{PkgCacheError, PkgCacheResult};
