//! Terminal output for the pkgcache binary
//!
//! Uses `cliclack` log lines on an interactive terminal and bracketed plain
//! text otherwise, so deployment agents capturing stdout get stable output.

mod context;
mod output;

pub use context::UiContext;
pub use output::{
    format_bytes, intro, key_value, remark, step_info, step_ok, step_ok_detail, step_warn,
    step_warn_hint,
};
