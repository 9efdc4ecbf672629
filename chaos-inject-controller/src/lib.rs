pub mod cmd;
pub mod config;
pub mod raw_config;
