pub mod clock;
pub mod models;
pub mod monitoring_config;
pub mod status;
pub mod uptime;
