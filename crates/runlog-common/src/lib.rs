pub mod config;
pub mod logging;

pub const APP_NAME: &str = "runlog";

pub use config::{ConfigError, RemoteConfig, RunlogConfig};
