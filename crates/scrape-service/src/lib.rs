pub mod api;
pub mod config;
pub mod context;
pub mod error;

pub use config::{AppConfig, Config};
pub use context::{AppContext, StartupError};
