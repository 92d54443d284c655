//! Shared configuration for the taskgrid crates.

pub mod config;

pub use config::{load_dotenv, BanditConfig, Config, ExecutionConfig, ManagerConfig};
