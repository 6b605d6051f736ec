pub mod adm;
pub mod config;
pub mod logging;
