//! # MiniGame Core - 小游戏宿主内核
//!
//! 按需下载、本地缓存并逐个运行可插拔小游戏模块：
//!
//! - **加载方式解析**: 根据模块的内置/远程设置，通过引用计数推导共享依赖的加载方式
//! - **内容缓存**: 按 URL 缓存原始字节，支持 ETag / Last-Modified 条件请求、离线回退和淘汰
//! - **资源句柄聚合**: 会话获取的所有资源统一登记，按逆序释放且只释放一次
//! - **内置定位器**: 把清单中的远程资源包重映射到预打包的本地路径
//! - **会话**: 同一时刻只运行一个模块，线性状态机 + 无条件清理
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use minigame_core::{PlatformConfig, LoadType, ModuleDescriptor};
//!
//! let config = PlatformConfig::builder()
//!     .platform("android")
//!     .module(
//!         ModuleDescriptor::new("Puzzle", "https://cdn.example.com/games", "1.0.0")
//!             .with_dependency("https://cdn.example.com/shared/ui.json"),
//!         LoadType::Remote,
//!     )
//!     .build();
//! assert!(config.validate().is_ok());
//! ```
//!
//! ## 模块结构
//!
//! - `api` - 平台门面
//! - `cache` - 内容缓存
//! - `core` - 平台配置
//! - `locator` - 清单、重映射、内置资源包
//! - `module` - 模块描述、注册表、加载方式解析
//! - `resource` - 资源句柄聚合
//! - `session` - 会话状态机与编排
//! - `utils` - 错误类型、日志、ID

#![warn(rustdoc::missing_crate_level_docs)]

pub mod api;
pub mod cache;
pub mod core;
pub mod locator;
pub mod module;
pub mod resource;
pub mod session;
pub mod utils;

// 重导出常用类型，方便使用
pub use api::{MiniGamePlatform, PlatformServices};

pub use cache::{cache_key, ContentCache, EvictionPolicy, EvictionReport, FetchOrigin, Fetched};

pub use crate::core::config::{CacheConfig, LogConfig, PlatformConfig, PlatformConfigBuilder};

pub use locator::{BuiltInBundleStore, LocatorRegistry, Manifest, ResourceKind, ResourceLocation};

pub use module::{LoadType, LoadTypeResolver, ModuleDescriptor, ModuleEntry, ModuleRegistry};

pub use resource::{Acquired, CallbackHandle, HandleAggregator, ResourceHandle};

pub use session::{
    EntryPoint, ExecutionContext, ExecutionEnvironment, HostServices, ManifestSource,
    ModuleMessage, RunContext, Session, SessionManager, SessionOutcome, SessionState,
};

pub use utils::logger::{fields, LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};
pub use utils::{error_code, generate_id, status_code, CoreError, Result};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
