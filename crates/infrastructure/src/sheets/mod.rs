mod client;
mod reader;

pub use client::GoogleSheetsClient;
pub use reader::{quote_sheet_name, ResilientSheetReader};
