pub mod config;
pub mod database;
pub mod sheets;

pub use config::AppConfig;
pub use database::sqlite::{
    SqliteConflictRepository, SqliteCrmStore, SqliteMappingRepository, SqliteScheduleRepository,
    SqliteSyncTaskRepository,
};
pub use sheets::{GoogleSheetsClient, ResilientSheetReader};
