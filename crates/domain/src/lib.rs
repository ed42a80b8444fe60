pub mod entities;
pub mod ports;
pub mod repositories;
pub mod value_objects;

pub use entities::*;
pub use repositories::*;
pub use sheetsync_errors::{SyncError, SyncResult};
pub use value_objects::*;
