//! 核心模块
//!
//! 包含平台配置。

pub mod config;

pub use config::{CacheConfig, LogConfig, PlatformConfig, PlatformConfigBuilder};
