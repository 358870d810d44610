//! MiniGamePlatform SDK
//!
//! 平台的主要对外接口，把配置、内容缓存、加载方式解析、内置资源包存储和会话管理组合在一起：
//!
//! - 模块：列出模块、查询和修改加载方式
//! - 会话：启动、强制结束、预加载、缓存就绪检查
//! - 缓存：淘汰、清空、预打包内置资源包
//!
//! # 示例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use minigame_core::{MiniGamePlatform, PlatformConfig, PlatformServices};
//! # use minigame_core::session::{ExecutionEnvironment, ManifestSource};
//! # fn services() -> (Arc<dyn ManifestSource>, Arc<dyn ExecutionEnvironment>) { unimplemented!() }
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PlatformConfig::from_file("platform.yaml").await?;
//!     let (manifests, environment) = services();
//!     let platform = MiniGamePlatform::new(config, PlatformServices::new(manifests, environment))?;
//!
//!     let session = platform.start("Puzzle", &CancellationToken::new())?;
//!     let outcome = session.wait().await;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::cache::{ContentCache, EvictionPolicy, EvictionReport};
use crate::core::config::PlatformConfig;
use crate::locator::{BuiltInBundleStore, LocatorRegistry};
use crate::module::{LoadType, LoadTypeResolver, ModuleRegistry};
use crate::session::{
    ExecutionEnvironment, HostServices, ManifestSource, ModuleSnapshot, Session, SessionDeps,
    SessionManager,
};
use crate::utils::{CoreError, Result};

/// 宿主注入的服务
#[derive(Clone)]
pub struct PlatformServices {
    pub manifests: Arc<dyn ManifestSource>,
    pub environment: Arc<dyn ExecutionEnvironment>,
    pub host: HostServices,
}

impl PlatformServices {
    /// 使用默认宿主服务（不保存、不统计、日志转发到 tracing）
    pub fn new(
        manifests: Arc<dyn ManifestSource>,
        environment: Arc<dyn ExecutionEnvironment>,
    ) -> Self {
        Self {
            manifests,
            environment,
            host: HostServices::default(),
        }
    }

    pub fn with_host(mut self, host: HostServices) -> Self {
        self.host = host;
        self
    }
}

/// 模块注册表和解析器总是一起修改
struct Resolution {
    registry: ModuleRegistry,
    resolver: LoadTypeResolver,
}

impl Resolution {
    fn snapshot(&self) -> ModuleSnapshot {
        ModuleSnapshot::new(self.registry.clone(), self.resolver.resolved())
    }
}

/// 小游戏平台
///
/// # 组件
///
/// - `cache`: 内容缓存（下载、条件请求、淘汰）
/// - `builtin`: 内置资源包存储
/// - `locators`: 已安装的本地定位器
/// - `resolution`: 模块注册表 + 共享依赖加载方式解析
/// - `sessions`: 会话管理器
pub struct MiniGamePlatform {
    config: PlatformConfig,
    cache: ContentCache,
    builtin: Arc<BuiltInBundleStore>,
    locators: Arc<LocatorRegistry>,
    resolution: Mutex<Resolution>,
    sessions: SessionManager,
}

impl MiniGamePlatform {
    /// 创建平台实例
    ///
    /// # Errors
    ///
    /// - 配置无效：`CoreError::InvalidConfigValue`
    /// - 模块名称重复：`CoreError::InvalidArgument`
    /// - HTTP 客户端创建失败
    pub fn new(config: PlatformConfig, services: PlatformServices) -> Result<Self> {
        info!("初始化小游戏平台 v{}", crate::VERSION);
        config.validate()?;

        let cache = ContentCache::from_config(&config.cache)?;
        debug!("内容缓存: {:?}", cache.layout().root());

        let registry = ModuleRegistry::from_entries(config.modules.iter().cloned())?;
        let mut resolver = LoadTypeResolver::new(registry.dependencies());
        resolver.resolve(&registry.load_types())?;
        let resolution = Resolution { registry, resolver };
        debug!("模块注册完成: {} 个", resolution.registry.len());

        let locators = Arc::new(LocatorRegistry::new());
        let builtin = Arc::new(BuiltInBundleStore::new(
            config.cache.builtin_dir.clone(),
            cache.clone(),
            services.manifests.clone(),
            locators.clone(),
        ));

        let sessions = SessionManager::new(
            SessionDeps {
                platform: config.platform.clone(),
                manifests: services.manifests,
                environment: services.environment,
                builtin: builtin.clone(),
                services: services.host,
            },
            resolution.snapshot(),
        );

        info!("小游戏平台初始化完成");
        Ok(Self {
            config,
            cache,
            builtin,
            locators,
            resolution: Mutex::new(resolution),
            sessions,
        })
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    pub fn builtin(&self) -> &Arc<BuiltInBundleStore> {
        &self.builtin
    }

    pub fn locators(&self) -> &Arc<LocatorRegistry> {
        &self.locators
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    // ========================================================================
    // 模块
    // ========================================================================

    /// 模块名称（配置顺序）
    pub fn module_names(&self) -> Vec<String> {
        self.sessions.module_names()
    }

    /// 共享依赖的加载方式
    pub fn resolved_load_types(&self) -> BTreeMap<String, LoadType> {
        self.resolution.lock().resolver.resolved()
    }

    /// 模块的加载方式
    pub fn module_load_type(&self, name: &str) -> Result<LoadType> {
        self.resolution
            .lock()
            .registry
            .get(name)
            .map(|entry| entry.load_type)
            .ok_or_else(|| CoreError::ModuleNotFound(name.to_string()))
    }

    /// 修改模块的加载方式，增量更新解析结果并发布新快照
    ///
    /// 之后启动的会话使用新的加载方式。
    #[instrument(skip(self))]
    pub fn set_module_load_type(&self, name: &str, load_type: LoadType) -> Result<()> {
        let mut resolution = self.resolution.lock();
        let old = resolution.registry.set_load_type(name, load_type)?;

        if let Err(e) = resolution.resolver.apply_change(name, old, load_type) {
            resolution.registry.set_load_type(name, old)?;
            return Err(e);
        }

        self.sessions.publish(resolution.snapshot());
        info!("模块 '{}' 加载方式: {} -> {}", name, old, load_type);
        Ok(())
    }

    // ========================================================================
    // 会话
    // ========================================================================

    /// 启动会话，见 [`SessionManager::start`]
    pub fn start(&self, name: &str, cancel: &CancellationToken) -> Result<Session> {
        self.sessions.start(name, cancel)
    }

    pub fn active_session(&self) -> Option<Session> {
        self.sessions.active_session()
    }

    pub async fn force_end(&self) -> Result<()> {
        self.sessions.force_end().await
    }

    pub async fn is_cache_ready(&self, name: &str) -> Result<bool> {
        self.sessions.is_cache_ready(name).await
    }

    pub async fn preload(&self, name: &str) -> Result<()> {
        self.sessions.preload(name).await
    }

    // ========================================================================
    // 缓存
    // ========================================================================

    /// 按配置的策略淘汰内容缓存
    pub async fn evict_cache(&self) -> EvictionReport {
        self.cache
            .evict(EvictionPolicy::from(&self.config.cache))
            .await
    }

    /// 清空内容缓存
    pub async fn clear_cache(&self) -> Result<()> {
        self.cache.clear_all().await
    }

    /// 需要内置的清单地址：内置模块的清单 + 解析为内置的共享依赖
    pub fn builtin_manifest_urls(&self) -> Vec<String> {
        let resolution = self.resolution.lock();
        let mut urls: BTreeSet<String> = resolution
            .resolver
            .resolved()
            .into_iter()
            .filter(|(_, load_type)| load_type.is_builtin())
            .map(|(url, _)| url)
            .collect();

        urls.extend(
            resolution
                .registry
                .entries()
                .iter()
                .filter(|entry| entry.load_type.is_builtin())
                .map(|entry| entry.descriptor.manifest_url(&self.config.platform)),
        );
        urls.into_iter().collect()
    }

    /// 预打包：内置目录中只保留需要的清单，并确保它们的资源包都已下载
    #[instrument(skip(self))]
    pub async fn prepackage(&self) -> Result<()> {
        let urls = self.builtin_manifest_urls();
        info!("预打包 {} 个清单", urls.len());
        self.builtin.ensure_only_necessary_stored(&urls).await
    }
}

impl std::fmt::Debug for MiniGamePlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiniGamePlatform")
            .field("platform", &self.config.platform)
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}
