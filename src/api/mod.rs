//! API 模块
//!
//! 对外提供的 SDK 接口。
//!
//! - `sdk`: MiniGamePlatform 主接口，组合缓存、模块解析和会话管理

pub mod sdk;

pub use sdk::{MiniGamePlatform, PlatformServices};
