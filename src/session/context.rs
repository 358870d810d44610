//! 运行上下文与宿主服务
//!
//! 宿主提供存档、统计和日志三种服务。交给模块之前，每个服务都被包装成
//! “内部实现 + 键变换函数”的组合：所有键或消息都以会话名称作为命名空间。
//! 没有活跃会话或会话已完成时，变换函数返回 `CoreError::InvalidOperation`。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::utils::{CoreError, Result};

// ============================================================================
// 宿主服务接口
// ============================================================================

/// 存档服务
pub trait SaveProvider: Send + Sync {
    fn save(&self, key: &str, value: Value) -> Result<()>;
    fn get_int(&self, key: &str, default: i64) -> Result<i64>;
    fn get_float(&self, key: &str, default: f64) -> Result<f64>;
    fn get_string(&self, key: &str, default: &str) -> Result<String>;
}

/// 统计事件的值
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyticsValue {
    Text(String),
    Int(i64),
    Float(f64),
}

impl From<&str> for AnalyticsValue {
    fn from(value: &str) -> Self {
        AnalyticsValue::Text(value.to_string())
    }
}

impl From<String> for AnalyticsValue {
    fn from(value: String) -> Self {
        AnalyticsValue::Text(value)
    }
}

impl From<i64> for AnalyticsValue {
    fn from(value: i64) -> Self {
        AnalyticsValue::Int(value)
    }
}

impl From<f64> for AnalyticsValue {
    fn from(value: f64) -> Self {
        AnalyticsValue::Float(value)
    }
}

impl fmt::Display for AnalyticsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalyticsValue::Text(v) => write!(f, "{}", v),
            AnalyticsValue::Int(v) => write!(f, "{}", v),
            AnalyticsValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// 统计服务
pub trait AnalyticsLogger: Send + Sync {
    fn log_event(&self, key: &str, value: AnalyticsValue) -> Result<()>;
}

/// 模块日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// 交给模块的日志服务
pub trait ModuleLogger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str) -> Result<()>;
}

// ============================================================================
// 键变换
// ============================================================================

/// 键（或消息）变换函数
pub type KeyDecorator = Arc<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// 当前活跃会话的名称与完成状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveScope {
    pub name: String,
    pub completed: bool,
}

/// 查询当前活跃会话
pub type ScopeProbe = Arc<dyn Fn() -> Option<ActiveScope> + Send + Sync>;

fn scoped_decorator(
    probe: ScopeProbe,
    service: &'static str,
    format: fn(&str, &str) -> String,
) -> KeyDecorator {
    Arc::new(move |key: &str| match probe() {
        None => Err(CoreError::InvalidOperation(format!(
            "没有活跃的小游戏会话，无法为{}变换键",
            service
        ))),
        Some(scope) if scope.completed => Err(CoreError::InvalidOperation(format!(
            "小游戏会话 '{}' 已完成，无法为{}变换键",
            scope.name, service
        ))),
        Some(scope) => Ok(format(&scope.name, key)),
    })
}

/// 存档键：`{name}_{key}`
pub fn save_key_decorator(probe: ScopeProbe) -> KeyDecorator {
    scoped_decorator(probe, "存档服务", |name, key| format!("{}_{}", name, key))
}

/// 统计键：`{name}/{key}`
pub fn analytics_key_decorator(probe: ScopeProbe) -> KeyDecorator {
    scoped_decorator(probe, "统计服务", |name, key| format!("{}/{}", name, key))
}

/// 日志消息：`[{name}]: {message}`
pub fn log_message_decorator(probe: ScopeProbe) -> KeyDecorator {
    scoped_decorator(probe, "日志服务", |name, message| {
        format!("[{}]: {}", name, message)
    })
}

// ============================================================================
// 带命名空间的包装
// ============================================================================

/// 带命名空间的存档服务
#[derive(Clone)]
pub struct ScopedSaveProvider {
    inner: Arc<dyn SaveProvider>,
    decorate: KeyDecorator,
}

impl ScopedSaveProvider {
    pub fn new(inner: Arc<dyn SaveProvider>, decorate: KeyDecorator) -> Self {
        Self { inner, decorate }
    }
}

impl SaveProvider for ScopedSaveProvider {
    fn save(&self, key: &str, value: Value) -> Result<()> {
        self.inner.save(&(self.decorate)(key)?, value)
    }

    fn get_int(&self, key: &str, default: i64) -> Result<i64> {
        self.inner.get_int(&(self.decorate)(key)?, default)
    }

    fn get_float(&self, key: &str, default: f64) -> Result<f64> {
        self.inner.get_float(&(self.decorate)(key)?, default)
    }

    fn get_string(&self, key: &str, default: &str) -> Result<String> {
        self.inner.get_string(&(self.decorate)(key)?, default)
    }
}

/// 带命名空间的统计服务
#[derive(Clone)]
pub struct ScopedAnalyticsLogger {
    inner: Arc<dyn AnalyticsLogger>,
    decorate: KeyDecorator,
}

impl ScopedAnalyticsLogger {
    pub fn new(inner: Arc<dyn AnalyticsLogger>, decorate: KeyDecorator) -> Self {
        Self { inner, decorate }
    }
}

impl AnalyticsLogger for ScopedAnalyticsLogger {
    fn log_event(&self, key: &str, value: AnalyticsValue) -> Result<()> {
        self.inner.log_event(&(self.decorate)(key)?, value)
    }
}

/// 带会话前缀的日志服务
#[derive(Clone)]
pub struct ScopedModuleLogger {
    inner: Arc<dyn ModuleLogger>,
    decorate: KeyDecorator,
}

impl ScopedModuleLogger {
    pub fn new(inner: Arc<dyn ModuleLogger>, decorate: KeyDecorator) -> Self {
        Self { inner, decorate }
    }
}

impl ModuleLogger for ScopedModuleLogger {
    fn log(&self, level: LogLevel, message: &str) -> Result<()> {
        self.inner.log(level, &(self.decorate)(message)?)
    }
}

// ============================================================================
// 宿主服务集合与运行上下文
// ============================================================================

/// 宿主范围的服务实现
#[derive(Clone)]
pub struct HostServices {
    pub save: Arc<dyn SaveProvider>,
    pub analytics: Arc<dyn AnalyticsLogger>,
    pub logger: Arc<dyn ModuleLogger>,
}

impl Default for HostServices {
    fn default() -> Self {
        Self {
            save: Arc::new(NoopSaveProvider),
            analytics: Arc::new(NoopAnalyticsLogger),
            logger: Arc::new(TracingModuleLogger),
        }
    }
}

impl HostServices {
    /// 以给定的会话查询函数包装所有服务
    pub fn scoped(&self, probe: ScopeProbe) -> (ScopedSaveProvider, ScopedAnalyticsLogger, ScopedModuleLogger) {
        (
            ScopedSaveProvider::new(self.save.clone(), save_key_decorator(probe.clone())),
            ScopedAnalyticsLogger::new(
                self.analytics.clone(),
                analytics_key_decorator(probe.clone()),
            ),
            ScopedModuleLogger::new(self.logger.clone(), log_message_decorator(probe)),
        )
    }
}

impl fmt::Debug for HostServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostServices").finish_non_exhaustive()
    }
}

/// 交给入口点的运行上下文
#[derive(Clone)]
pub struct RunContext {
    pub session_name: String,
    pub save: Arc<dyn SaveProvider>,
    pub analytics: Arc<dyn AnalyticsLogger>,
    pub logger: Arc<dyn ModuleLogger>,
}

impl RunContext {
    /// 为会话构建上下文：每个服务都带上会话命名空间
    pub fn scoped(session_name: impl Into<String>, services: &HostServices, probe: ScopeProbe) -> Self {
        let (save, analytics, logger) = services.scoped(probe);
        Self {
            session_name: session_name.into(),
            save: Arc::new(save),
            analytics: Arc::new(analytics),
            logger: Arc::new(logger),
        }
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("session_name", &self.session_name)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// 默认实现
// ============================================================================

/// 不保存任何数据，读取总是返回默认值
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSaveProvider;

impl SaveProvider for NoopSaveProvider {
    fn save(&self, _key: &str, _value: Value) -> Result<()> {
        Ok(())
    }

    fn get_int(&self, _key: &str, default: i64) -> Result<i64> {
        Ok(default)
    }

    fn get_float(&self, _key: &str, default: f64) -> Result<f64> {
        Ok(default)
    }

    fn get_string(&self, _key: &str, default: &str) -> Result<String> {
        Ok(default.to_string())
    }
}

/// 丢弃所有统计事件
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAnalyticsLogger;

impl AnalyticsLogger for NoopAnalyticsLogger {
    fn log_event(&self, _key: &str, _value: AnalyticsValue) -> Result<()> {
        Ok(())
    }
}

/// 内存存档
#[derive(Debug, Default)]
pub struct MemorySaveProvider {
    values: RwLock<HashMap<String, Value>>,
}

impl MemorySaveProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }
}

impl SaveProvider for MemorySaveProvider {
    fn save(&self, key: &str, value: Value) -> Result<()> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    fn get_int(&self, key: &str, default: i64) -> Result<i64> {
        Ok(self.get(key).and_then(|v| v.as_i64()).unwrap_or(default))
    }

    fn get_float(&self, key: &str, default: f64) -> Result<f64> {
        Ok(self.get(key).and_then(|v| v.as_f64()).unwrap_or(default))
    }

    fn get_string(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get(key)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| default.to_string()))
    }
}

/// 转发到 tracing 的模块日志
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingModuleLogger;

impl ModuleLogger for TracingModuleLogger {
    fn log(&self, level: LogLevel, message: &str) -> Result<()> {
        match level {
            LogLevel::Debug => tracing::debug!(target: "minigame", "{}", message),
            LogLevel::Info => tracing::info!(target: "minigame", "{}", message),
            LogLevel::Warn => tracing::warn!(target: "minigame", "{}", message),
            LogLevel::Error => tracing::error!(target: "minigame", "{}", message),
        }
        Ok(())
    }
}
