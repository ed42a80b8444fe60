mod conflict;
mod mapping;
mod schedule;
mod task;

pub use conflict::{Conflict, ConflictKind, ResolutionStatus};
pub use mapping::{ColumnKey, ColumnMapping, ColumnTag, ConflictPolicy, Mapping, MappingDefaults};
pub use schedule::{Frequency, SyncSchedule};
pub use task::{SyncTask, TaskKind, TaskStatus};
