//! Command implementations for the meldbox CLI.

pub mod clean;
pub mod fetch;
pub mod preflight;
pub mod provision;
pub mod show;
pub mod start;

pub use clean::cmd_clean;
pub use fetch::cmd_fetch;
pub use preflight::cmd_preflight;
pub use provision::cmd_provision;
pub use show::cmd_show;
pub use start::cmd_start;
