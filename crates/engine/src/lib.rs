pub mod engine;
pub mod reverse;
pub mod row_mapper;
pub mod service;
pub mod test_utils;

pub use engine::{EngineOptions, SyncEngine};
pub use reverse::{ReversePushReport, ReverseSyncService};
pub use row_mapper::{parse_amount, parse_sheet_date, RowMapper};
pub use service::SyncService;
