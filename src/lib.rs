// Allow dead code for public API functions that may not be used internally
// but are part of the library's exposed interface
#![allow(dead_code)]

pub mod aggregator;
pub mod browser;
pub mod chrome;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod events;
pub mod export;
pub mod pool;
pub mod proxy;
pub mod record;
pub mod run;
pub mod session;
pub mod stealth;
pub mod task;

pub use aggregator::{Progress, RunSummary};
pub use record::BusinessRecord;
pub use run::{start_run, RunHandle, RunOptions};
