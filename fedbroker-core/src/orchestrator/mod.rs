//! Federation orchestrator: fan out, collect under a deadline, rank, page.
//!
//! [`dispatch`] spawns one task per selected source. [`monitor`] waits on
//! those tasks against a single shared deadline, merges what came back and
//! hands the merged set to [`sort`] for ranking.

pub mod dispatch;
pub mod monitor;
pub mod sort;

pub use dispatch::{Dispatch, Dispatcher, SourceTask};
pub use monitor::{MonitorSettings, aggregate};
