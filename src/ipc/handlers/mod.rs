pub mod analytics;
pub mod backup_exchange;
pub mod core;
pub mod forms;
pub mod responses;
pub mod setup;
pub mod students;
