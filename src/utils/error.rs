//! 小游戏内核错误类型定义
//!
//! 本模块定义了内核中使用的所有错误类型。

use thiserror::Error;

use crate::session::SessionState;

/// 小游戏内核核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    // ==================== 未找到（编程错误，不重试） ====================

    /// 模块未找到
    #[error("模块未找到: '{0}'")]
    ModuleNotFound(String),

    /// 共享依赖未找到
    #[error("共享依赖未找到: '{0}'")]
    DependencyNotFound(String),

    // ==================== 契约误用（立即失败） ====================

    /// 资源聚合器已释放
    #[error("对象已释放: {0}")]
    Disposed(&'static str),

    /// 非法操作
    #[error("非法操作: {0}")]
    InvalidOperation(String),

    /// 非法参数
    #[error("非法参数: {0}")]
    InvalidArgument(String),

    /// 已有会话在运行
    #[error("已有小游戏会话在运行: '{0}'")]
    SessionAlreadyActive(String),

    /// 非法的状态转换
    #[error("非法的状态转换: {from} -> {to}")]
    InvalidStateTransition {
        from: SessionState,
        to: SessionState,
    },

    // ==================== 下载与清单 ====================

    /// 下载失败（网络或协议错误）
    #[error("下载失败: '{url}' - {reason}")]
    Download {
        url: String,
        reason: String,
    },

    /// 清单加载失败
    #[error("清单加载失败: '{location}' - {reason}")]
    ManifestLoadFailed {
        location: String,
        reason: String,
    },

    /// 预打包失败
    #[error("内置资源预打包失败: {0}")]
    Prepackage(String),

    // ==================== 会话运行 ====================

    /// 清单中找不到入口点
    #[error("清单 '{0}' 中找不到入口点")]
    EntryPointNotFound(String),

    /// 模块自身报告的错误
    #[error("模块运行出错: {0}")]
    ModuleFailure(String),

    /// 会话故障：编排过程中任何步骤的失败都包装为此错误
    #[error("会话故障（{stage} 阶段）: {source}")]
    Fault {
        stage: SessionState,
        #[source]
        source: Box<CoreError>,
    },

    /// 操作被取消
    #[error("操作被取消")]
    Cancelled,

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 配置值无效
    #[error("配置值无效: '{key}' - {reason}")]
    InvalidConfigValue {
        key: String,
        reason: String,
    },

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// 版本解析错误
    #[error("版本解析错误: {0}")]
    VersionParse(#[from] semver::Error),

    /// HTTP 客户端错误
    #[error("HTTP 错误: {0}")]
    Http(#[from] reqwest::Error),

    // ==================== 通用错误 ====================

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),
}

/// 内核操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

/// 状态码常量
pub mod status_code {
    /// 成功
    pub const OK: u16 = 200;

    /// 请求格式错误
    pub const BAD_REQUEST: u16 = 400;

    /// 未找到
    pub const NOT_FOUND: u16 = 404;

    /// 冲突
    pub const CONFLICT: u16 = 409;

    /// 对象已失效
    pub const GONE: u16 = 410;

    /// 内部错误
    pub const INTERNAL_ERROR: u16 = 500;

    /// 上游错误（下载失败）
    pub const BAD_GATEWAY: u16 = 502;

    /// 服务不可用
    pub const SERVICE_UNAVAILABLE: u16 = 503;
}

/// 错误码常量
pub mod error_code {
    // 模块错误 (MODULE-xxx)
    pub const MODULE_NOT_FOUND: &str = "MODULE-001";
    pub const MODULE_DEPENDENCY_NOT_FOUND: &str = "MODULE-002";
    pub const MODULE_ENTRY_POINT_NOT_FOUND: &str = "MODULE-003";
    pub const MODULE_EXECUTION_ERROR: &str = "MODULE-004";
    pub const MODULE_VERSION_INVALID: &str = "MODULE-005";

    // 缓存与下载错误 (CACHE-xxx)
    pub const CACHE_DOWNLOAD_FAILED: &str = "CACHE-001";
    pub const CACHE_MANIFEST_LOAD_FAILED: &str = "CACHE-002";
    pub const CACHE_PREPACKAGE_FAILED: &str = "CACHE-003";

    // 会话错误 (SESSION-xxx)
    pub const SESSION_ALREADY_ACTIVE: &str = "SESSION-001";
    pub const SESSION_FAULT: &str = "SESSION-002";
    pub const SESSION_CANCELLED: &str = "SESSION-003";
    pub const SESSION_INVALID_TRANSITION: &str = "SESSION-004";

    // 契约错误 (CONTRACT-xxx)
    pub const CONTRACT_DISPOSED: &str = "CONTRACT-001";
    pub const CONTRACT_INVALID_OPERATION: &str = "CONTRACT-002";
    pub const CONTRACT_INVALID_ARGUMENT: &str = "CONTRACT-003";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
    pub const CONFIG_INVALID_VALUE: &str = "CONFIG-002";
}

impl CoreError {
    /// 把任意错误包装为指定阶段的会话故障
    ///
    /// 已经是故障的错误保持原样，避免多层嵌套。
    pub fn fault(stage: SessionState, source: CoreError) -> Self {
        match source {
            fault @ CoreError::Fault { .. } => fault,
            other => CoreError::Fault {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// 是否为下载类错误（可走缓存陈旧回退）
    pub fn is_download(&self) -> bool {
        matches!(self, CoreError::Download { .. } | CoreError::Http(_))
    }

    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::ModuleNotFound(_) => error_code::MODULE_NOT_FOUND,
            CoreError::DependencyNotFound(_) => error_code::MODULE_DEPENDENCY_NOT_FOUND,
            CoreError::EntryPointNotFound(_) => error_code::MODULE_ENTRY_POINT_NOT_FOUND,
            CoreError::ModuleFailure(_) => error_code::MODULE_EXECUTION_ERROR,
            CoreError::VersionParse(_) => error_code::MODULE_VERSION_INVALID,
            CoreError::Download { .. } | CoreError::Http(_) => error_code::CACHE_DOWNLOAD_FAILED,
            CoreError::ManifestLoadFailed { .. } => error_code::CACHE_MANIFEST_LOAD_FAILED,
            CoreError::Prepackage(_) => error_code::CACHE_PREPACKAGE_FAILED,
            CoreError::SessionAlreadyActive(_) => error_code::SESSION_ALREADY_ACTIVE,
            CoreError::Fault { .. } => error_code::SESSION_FAULT,
            CoreError::Cancelled => error_code::SESSION_CANCELLED,
            CoreError::InvalidStateTransition { .. } => error_code::SESSION_INVALID_TRANSITION,
            CoreError::Disposed(_) => error_code::CONTRACT_DISPOSED,
            CoreError::InvalidOperation(_) => error_code::CONTRACT_INVALID_OPERATION,
            CoreError::InvalidArgument(_) => error_code::CONTRACT_INVALID_ARGUMENT,
            CoreError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            CoreError::InvalidConfigValue { .. } => error_code::CONFIG_INVALID_VALUE,
            _ => "UNKNOWN",
        }
    }

    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::ModuleNotFound(_)
            | CoreError::DependencyNotFound(_)
            | CoreError::EntryPointNotFound(_) => status_code::NOT_FOUND,
            CoreError::InvalidArgument(_)
            | CoreError::InvalidConfigValue { .. }
            | CoreError::VersionParse(_) => status_code::BAD_REQUEST,
            CoreError::SessionAlreadyActive(_) | CoreError::InvalidStateTransition { .. } => {
                status_code::CONFLICT
            }
            CoreError::Disposed(_) => status_code::GONE,
            CoreError::Download { .. } | CoreError::Http(_) => status_code::BAD_GATEWAY,
            CoreError::Cancelled => status_code::SERVICE_UNAVAILABLE,
            _ => status_code::INTERNAL_ERROR,
        }
    }
}
