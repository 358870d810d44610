//! 外部协作服务接口
//!
//! 清单加载与下载、隔离执行环境、模块入口点都由宿主注入，内核只依赖这些接口。

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::locator::{Manifest, ResourceLocation};
use crate::resource::{Acquired, ResourceHandle};
use crate::session::context::RunContext;
use crate::session::observer::ObserverList;
use crate::utils::{generate_prefixed_id, Result};

/// 清单来源
///
/// 每次获取都返回拥有该资源的句柄，由调用方交给聚合器管理。
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// 加载清单（远程地址或本地路径）
    async fn load_manifest(&self, location: &str) -> Result<Acquired<Manifest>>;

    /// 查询某个键尚需下载的字节数；0 表示已在本地
    async fn probe_download_size(&self, key: &str) -> Result<Acquired<u64>>;

    /// 下载一组键对应的内容
    async fn download(&self, keys: &[String]) -> Result<Box<dyn ResourceHandle>>;
}

/// 隔离的执行上下文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub id: String,
    pub name: String,
}

impl ExecutionContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: generate_prefixed_id("ctx"),
            name: name.into(),
        }
    }
}

/// 执行环境
#[async_trait]
pub trait ExecutionEnvironment: Send + Sync {
    /// 为模块创建隔离的执行上下文
    async fn create_isolated_context(&self, name: &str) -> Result<ExecutionContext>;

    /// 在上下文中实例化入口点
    async fn instantiate(
        &self,
        location: &ResourceLocation,
        context: &ExecutionContext,
    ) -> Result<Acquired<std::sync::Arc<dyn EntryPoint>>>;

    /// 销毁上下文
    async fn teardown(&self, context: &ExecutionContext) -> Result<()>;

    /// 应用模块要求的渲染配置
    fn apply_render_profile(&self, _profile: &str) -> Result<()> {
        Ok(())
    }

    /// 当前是否存在被覆盖的环境设置
    fn overrides_active(&self) -> bool {
        false
    }

    /// 恢复原始环境设置
    fn restore_overrides(&self) -> Result<()> {
        Ok(())
    }
}

/// 模块发给宿主的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleMessage {
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ModuleMessage {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

impl fmt::Display for ModuleMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.payload)
    }
}

/// 模块入口点
///
/// 由每个模块实现。进度和消息通过观察者列表发布。
#[async_trait]
pub trait EntryPoint: Send + Sync {
    /// 初始化，接收带命名空间的宿主服务
    async fn initialize(&self, context: RunContext) -> Result<()>;

    /// 加载模块自身的内容
    async fn load(&self) -> Result<()>;

    /// 等待模块运行结束；`cancel` 被触发时应尽快返回
    async fn wait_for_end(&self, cancel: CancellationToken) -> Result<()>;

    /// 卸载
    async fn unload(&self) -> Result<()>;

    /// 强制结束（宿主主动终止）
    fn force_end(&self) -> Result<()>;

    /// 释放入口点
    async fn dispose(&self) -> Result<()>;

    /// 加载/卸载进度（0.0 ~ 1.0）
    fn progress(&self) -> &ObserverList<f32>;

    /// 模块发出的消息
    fn messages(&self) -> &ObserverList<ModuleMessage>;
}
