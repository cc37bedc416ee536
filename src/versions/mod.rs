//! Version storage: the durable log, the in-memory table rebuilt from it,
//! and the current-version projection.

mod log;
mod projector;
mod table;

pub use log::{CommittedRun, LogEntry, VersionLog};
pub use projector::project_current;
pub use table::VersionTable;
