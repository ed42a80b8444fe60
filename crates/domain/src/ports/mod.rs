pub mod crm;
pub mod sheets;
