//! 平台配置
//!
//! 定义宿主平台的配置结构和加载逻辑。支持 YAML 与 JSON（按扩展名区分）。

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::module::{LoadType, ModuleDescriptor, ModuleEntry};
use crate::utils::{CoreError, Result};

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
        }
    }
}

/// 缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// 内容缓存根目录
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// 内置资源包根目录
    #[serde(default = "default_builtin_dir")]
    pub builtin_dir: PathBuf,

    /// 最大缓存天数
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,

    /// 缓存总大小上限（字节）
    #[serde(default = "default_max_total_bytes")]
    pub max_total_bytes: u64,

    /// 单个请求超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./cache/content")
}

fn default_builtin_dir() -> PathBuf {
    PathBuf::from("./cache/builtin")
}

fn default_max_age_days() -> u64 {
    14
}

fn default_max_total_bytes() -> u64 {
    5 * 1024 * 1024 * 1024
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            builtin_dir: default_builtin_dir(),
            max_age_days: default_max_age_days(),
            max_total_bytes: default_max_total_bytes(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// 平台配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 目标平台（清单地址中的平台段）
    #[serde(default = "default_platform")]
    pub platform: String,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 缓存配置
    #[serde(default)]
    pub cache: CacheConfig,

    /// 模块列表（有序）
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,
}

fn default_platform() -> String {
    std::env::consts::OS.to_string()
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            platform: default_platform(),
            logging: LogConfig::default(),
            cache: CacheConfig::default(),
            modules: Vec::new(),
        }
    }
}

impl PlatformConfig {
    /// 创建配置构建器
    pub fn builder() -> PlatformConfigBuilder {
        PlatformConfigBuilder::new()
    }

    /// 从文件加载配置
    ///
    /// `.json` 结尾按 JSON 解析，其余按 YAML 解析。
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            CoreError::ConfigLoadFailed(format!("无法读取 {}: {}", path.display(), e))
        })?;

        let mut config: PlatformConfig = if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        config.config_path = Some(path);
        Ok(config)
    }

    /// 校验配置，返回全部问题
    ///
    /// # Errors
    ///
    /// 存在任何问题时返回 `CoreError::InvalidConfigValue`，`reason` 中逐条列出。
    pub fn validate(&self) -> Result<()> {
        let problems = self.problems();
        if problems.is_empty() {
            return Ok(());
        }

        Err(CoreError::InvalidConfigValue {
            key: "modules".to_string(),
            reason: problems.join("; "),
        })
    }

    /// 列出配置中的所有问题
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut seen = HashSet::new();

        if self.platform.trim().is_empty() {
            problems.push("platform 不能为空".to_string());
        }
        if self.cache.request_timeout_secs == 0 {
            problems.push("cache.request_timeout_secs 必须大于 0".to_string());
        }

        for (index, entry) in self.modules.iter().enumerate() {
            let module = &entry.descriptor;
            if module.name.trim().is_empty() {
                problems.push(format!("modules[{}]: 名称为空", index));
            } else if !seen.insert(module.name.as_str()) {
                problems.push(format!("modules[{}]: 名称重复 '{}'", index, module.name));
            }
            if module.url.trim().is_empty() {
                problems.push(format!("modules[{}]: url 为空", index));
            }
            if let Err(e) = module.semver() {
                problems.push(format!(
                    "modules[{}]: 版本 '{}' 无效: {}",
                    index, module.version, e
                ));
            }
            if module.shared_dependencies.iter().any(|d| d.trim().is_empty()) {
                problems.push(format!("modules[{}]: 存在空的共享依赖地址", index));
            }
        }

        problems
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct PlatformConfigBuilder {
    config: PlatformConfig,
}

impl PlatformConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            config: PlatformConfig::default(),
        }
    }

    /// 设置目标平台
    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.config.platform = platform.into();
        self
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用文件日志
    pub fn file_logging(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.config.logging.file_output = true;
        self.config.logging.log_dir = Some(log_dir.into());
        self
    }

    /// 启用 JSON 格式日志
    pub fn json_logging(mut self) -> Self {
        self.config.logging.json_format = true;
        self
    }

    /// 设置内容缓存目录
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache.cache_dir = dir.into();
        self
    }

    /// 设置内置资源包目录
    pub fn builtin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache.builtin_dir = dir.into();
        self
    }

    /// 设置淘汰策略
    pub fn eviction(mut self, max_age_days: u64, max_total_bytes: u64) -> Self {
        self.config.cache.max_age_days = max_age_days;
        self.config.cache.max_total_bytes = max_total_bytes;
        self
    }

    /// 设置请求超时
    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.cache.request_timeout_secs = secs;
        self
    }

    /// 追加模块
    pub fn module(mut self, descriptor: ModuleDescriptor, load_type: LoadType) -> Self {
        self.config
            .modules
            .push(ModuleEntry::new(descriptor, load_type));
        self
    }

    /// 构建配置
    pub fn build(self) -> PlatformConfig {
        self.config
    }
}
