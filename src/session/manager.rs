//! 会话管理器
//!
//! 负责单会话约束、后台编排与清理：
//!
//! 1. `ResourcesLoading`：加载模块及共享依赖的清单，查询待下载内容并下载
//! 2. 创建隔离执行上下文，定位并实例化入口点
//! 3. `Initializing`：传入带命名空间的运行上下文
//! 4. `Loading`：等待入口点加载，转发加载进度
//! 5. `Running`：等待模块结束或取消信号
//! 6. `Unloading`：只要到达过 `Running` 就执行，转发卸载进度
//! 7. 清理（总会执行）：解除订阅、恢复环境、销毁上下文、释放入口点和全部句柄，
//!    进入 `Finished` 后丢弃会话
//!
//! 任何步骤的失败都记录为会话故障，不会抛给 `start` 的调用方。

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, Instrument};

use crate::locator::{BuiltInBundleStore, Manifest};
use crate::module::{LoadType, ModuleEntry, ModuleRegistry};
use crate::resource::{Acquired, HandleAggregator};
use crate::session::context::{ActiveScope, HostServices, RunContext, ScopeProbe};
use crate::session::handle::{Session, SessionOutcome};
use crate::session::observer::SubscriptionId;
use crate::session::services::{EntryPoint, ExecutionContext, ExecutionEnvironment, ManifestSource};
use crate::session::state::SessionState;
use crate::utils::{fields, CoreError, Result};

/// 模块配置快照：注册表 + 共享依赖的解析结果
///
/// 会话启动时读取当前快照；配置变更通过 `SessionManager::publish` 整体替换。
#[derive(Debug, Clone, Default)]
pub struct ModuleSnapshot {
    pub registry: ModuleRegistry,
    pub dependency_types: BTreeMap<String, LoadType>,
}

impl ModuleSnapshot {
    pub fn new(registry: ModuleRegistry, dependency_types: BTreeMap<String, LoadType>) -> Self {
        Self {
            registry,
            dependency_types,
        }
    }

    /// 共享依赖的加载方式
    ///
    /// # Errors
    ///
    /// 依赖不在解析结果中时返回 `CoreError::DependencyNotFound`
    pub fn dependency_type(&self, url: &str) -> Result<LoadType> {
        self.dependency_types
            .get(url)
            .copied()
            .ok_or_else(|| CoreError::DependencyNotFound(url.to_string()))
    }
}

/// 会话管理器依赖的外部服务
#[derive(Clone)]
pub struct SessionDeps {
    pub platform: String,
    pub manifests: Arc<dyn ManifestSource>,
    pub environment: Arc<dyn ExecutionEnvironment>,
    pub builtin: Arc<BuiltInBundleStore>,
    pub services: HostServices,
}

/// 按加载方式取清单、查询并下载待下载内容
#[derive(Clone)]
struct ResourceLoader {
    platform: String,
    manifests: Arc<dyn ManifestSource>,
    builtin: Arc<BuiltInBundleStore>,
}

impl ResourceLoader {
    async fn load_manifest(&self, url: &str, load_type: LoadType) -> Result<Acquired<Manifest>> {
        match load_type {
            LoadType::BuiltIn => self.builtin.load_local_manifest(url).await,
            LoadType::Remote => self.manifests.load_manifest(url).await,
        }
    }

    /// 加载模块及共享依赖的清单，返回模块清单和待下载的键
    ///
    /// 每次获取的句柄都放入 `handles`；任一查询失败则整个步骤失败。
    async fn plan(
        &self,
        snapshot: &ModuleSnapshot,
        name: &str,
        handles: &mut HandleAggregator,
    ) -> Result<(Manifest, Vec<String>)> {
        let entry = snapshot
            .registry
            .get(name)
            .ok_or_else(|| CoreError::ModuleNotFound(name.to_string()))?;
        let descriptor = &entry.descriptor;
        let mut keys = BTreeSet::new();

        for dependency in &descriptor.shared_dependencies {
            let load_type = snapshot.dependency_type(dependency)?;
            let (manifest, handle) = self
                .load_manifest(dependency, load_type)
                .await?
                .into_parts();
            handles.add(handle)?;
            keys.extend(manifest.keys().map(str::to_string));
            tracing::debug!("共享依赖清单已加载: {} ({})", dependency, load_type);
        }

        let manifest_url = descriptor.manifest_url(&self.platform);
        let (manifest, handle) = self
            .load_manifest(&manifest_url, entry.load_type)
            .await?
            .into_parts();
        handles.add(handle)?;
        keys.extend(manifest.keys().map(str::to_string));

        let keys: Vec<String> = keys.into_iter().collect();
        let probes = join_all(
            keys.iter()
                .map(|key| self.manifests.probe_download_size(key)),
        )
        .await;

        let mut pending = Vec::new();
        let mut first_error = None;
        for (key, probe) in keys.iter().zip(probes) {
            match probe {
                Ok(acquired) => {
                    let (size, handle) = acquired.into_parts();
                    handles.add(handle)?;
                    if size > 0 {
                        pending.push(key.clone());
                    }
                }
                Err(e) => {
                    tracing::warn!("查询下载大小失败: {} ({})", key, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        tracing::debug!("模块 {}: {} 个键，{} 个待下载", name, keys.len(), pending.len());
        Ok((manifest, pending))
    }

    /// 下载待下载的键；列表为空时什么也不做
    async fn download(&self, pending: &[String], handles: &mut HandleAggregator) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        let handle = self.manifests.download(pending).await?;
        handles.add(handle)
    }
}

/// 会话管理器
pub struct SessionManager {
    snapshot: RwLock<Arc<ModuleSnapshot>>,
    loader: ResourceLoader,
    environment: Arc<dyn ExecutionEnvironment>,
    services: HostServices,
    active: Arc<Mutex<Option<Session>>>,
}

impl SessionManager {
    pub fn new(deps: SessionDeps, snapshot: ModuleSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
            loader: ResourceLoader {
                platform: deps.platform,
                manifests: deps.manifests,
                builtin: deps.builtin,
            },
            environment: deps.environment,
            services: deps.services,
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// 发布新的配置快照；已在运行的会话不受影响
    pub fn publish(&self, snapshot: ModuleSnapshot) {
        *self.snapshot.write() = Arc::new(snapshot);
    }

    pub fn snapshot(&self) -> Arc<ModuleSnapshot> {
        self.snapshot.read().clone()
    }

    /// 模块名称（配置顺序）
    pub fn module_names(&self) -> Vec<String> {
        self.snapshot().registry.names()
    }

    /// 当前活跃会话
    pub fn active_session(&self) -> Option<Session> {
        self.active.lock().clone()
    }

    /// 启动会话
    ///
    /// 立即返回会话句柄，编排在后台任务中进行。
    ///
    /// # Errors
    ///
    /// - 已有活跃会话：`CoreError::SessionAlreadyActive`
    /// - 名称为空：`CoreError::InvalidArgument`
    /// - 未知模块：`CoreError::ModuleNotFound`
    /// - 不在 tokio 运行时中调用：`CoreError::InvalidOperation`
    #[instrument(skip(self, cancel))]
    pub fn start(&self, name: &str, cancel: &CancellationToken) -> Result<Session> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| CoreError::InvalidOperation(format!("需要在 tokio 运行时中启动会话: {}", e)))?;
        let snapshot = self.snapshot();

        let session = {
            let mut active = self.active.lock();
            if let Some(existing) = active.as_ref() {
                return Err(CoreError::SessionAlreadyActive(existing.name().to_string()));
            }
            if name.trim().is_empty() {
                return Err(CoreError::InvalidArgument("模块名称不能为空".to_string()));
            }
            if !snapshot.registry.contains(name) {
                return Err(CoreError::ModuleNotFound(name.to_string()));
            }

            let session = Session::new(name, cancel);
            *active = Some(session.clone());
            session
        };

        let entry = snapshot
            .registry
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::ModuleNotFound(name.to_string()))?;

        let orchestration = Orchestration {
            session: session.clone(),
            entry,
            snapshot,
            loader: self.loader.clone(),
            environment: self.environment.clone(),
            services: self.services.clone(),
            active: self.active.clone(),
        };

        let span = crate::session_span!(session.id(), name);
        runtime.spawn(orchestration.run().instrument(span));

        tracing::info!("会话已启动: {} ({})", name, session.id());
        Ok(session)
    }

    /// 强制结束当前会话并等待清理完成；没有活跃会话时什么也不做
    ///
    /// 入口点 `force_end` 的错误记录为会话故障。
    pub async fn force_end(&self) -> Result<()> {
        let Some(session) = self.active_session() else {
            return Ok(());
        };

        if let Some(entry_point) = session.entry_point() {
            if let Err(e) = call_isolated(|| entry_point.force_end()) {
                session.record_fault(CoreError::fault(session.state(), e));
            }
        }

        session.cancel();
        let outcome = session.wait().await;
        tracing::info!("会话已强制结束: {} ({:?})", session.name(), outcome);
        Ok(())
    }

    /// 模块内容是否已全部在本地
    #[instrument(skip(self))]
    pub async fn is_cache_ready(&self, name: &str) -> Result<bool> {
        let snapshot = self.snapshot();
        let mut handles = HandleAggregator::new();

        let planned = self.loader.plan(&snapshot, name, &mut handles).await;
        let released = handles.dispose();
        let (_, pending) = planned?;
        released?;

        Ok(pending.is_empty())
    }

    /// 预先下载模块的待下载内容
    #[instrument(skip(self))]
    pub async fn preload(&self, name: &str) -> Result<()> {
        let snapshot = self.snapshot();
        let mut handles = HandleAggregator::new();

        let result: Result<usize> = async {
            let (_, pending) = self.loader.plan(&snapshot, name, &mut handles).await?;
            self.loader.download(&pending, &mut handles).await?;
            Ok(pending.len())
        }
        .await;
        let released = handles.dispose();
        let downloaded = result?;
        released?;

        tracing::info!("模块 {} 预加载完成: {} 个键", name, downloaded);
        Ok(())
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("modules", &self.module_names())
            .field("active", &self.active_session())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// 编排
// ============================================================================

#[derive(Default)]
struct RunState {
    context: Option<ExecutionContext>,
    progress_subscription: Option<SubscriptionId>,
    message_subscription: Option<SubscriptionId>,
    reached_running: bool,
}

struct Orchestration {
    session: Session,
    entry: ModuleEntry,
    snapshot: Arc<ModuleSnapshot>,
    loader: ResourceLoader,
    environment: Arc<dyn ExecutionEnvironment>,
    services: HostServices,
    active: Arc<Mutex<Option<Session>>>,
}

impl Orchestration {
    async fn run(self) {
        let mut guard = CompletionGuard::new(self.session.clone(), self.active.clone());
        let mut run = RunState::default();
        let mut cancelled = false;

        match isolate(self.drive(&mut run)).await {
            Ok(()) => {}
            Err(CoreError::Cancelled) => {
                cancelled = true;
                tracing::info!("会话被取消（{} 阶段）", self.session.state());
            }
            Err(e) => {
                self.session
                    .record_fault(CoreError::fault(self.session.state(), e));
            }
        }

        if run.reached_running {
            self.unload().await;
        }
        self.cleanup(&mut run).await;

        let outcome = match self.session.fault() {
            Some(fault) => SessionOutcome::Faulted(fault),
            None if cancelled || self.session.is_cancelled() => SessionOutcome::Cancelled,
            None => SessionOutcome::Finished,
        };
        let elapsed = chrono::Utc::now() - self.session.started_at();
        tracing::Span::current().record(fields::DURATION_MS, elapsed.num_milliseconds());
        tracing::info!("会话结束: {:?}", outcome);
        guard.disarm();
        self.session.complete(outcome);
    }

    async fn drive(&self, run: &mut RunState) -> Result<()> {
        let session = &self.session;

        session.set_state(SessionState::ResourcesLoading)?;
        let manifest = self.acquire_resources().await?;
        self.ensure_not_cancelled()?;

        let context = isolate(self.environment.create_isolated_context(session.name())).await?;
        run.context = Some(context.clone());

        let location = manifest
            .entry_point()
            .cloned()
            .ok_or_else(|| CoreError::EntryPointNotFound(manifest.locator_id.clone()))?;
        let (entry_point, handle) = isolate(self.environment.instantiate(&location, &context))
            .await?
            .into_parts();
        session.add_handle(handle)?;
        session.set_entry_point(entry_point.clone());
        call_isolated(|| self.attach(&entry_point, run))?;

        if let Some(ref profile) = self.entry.descriptor.render_profile {
            call_isolated(|| self.environment.apply_render_profile(profile))?;
        }
        self.ensure_not_cancelled()?;

        session.set_state(SessionState::Initializing)?;
        let run_context = RunContext::scoped(session.name(), &self.services, self.scope_probe());
        isolate(entry_point.initialize(run_context)).await?;
        self.ensure_not_cancelled()?;

        session.set_state(SessionState::Loading)?;
        isolate(entry_point.load()).await?;
        self.ensure_not_cancelled()?;

        session.set_state(SessionState::Running)?;
        run.reached_running = true;
        let token = session.cancel_token().clone();
        tokio::select! {
            result = isolate(entry_point.wait_for_end(token.clone())) => result,
            _ = token.cancelled() => Err(CoreError::Cancelled),
        }
    }

    /// 步骤 1 的所有句柄放在一个嵌套聚合器里，无论成败都交给会话
    async fn acquire_resources(&self) -> Result<Manifest> {
        let mut resources = HandleAggregator::new();
        let result: Result<Manifest> = isolate(async {
            let (manifest, pending) = self
                .loader
                .plan(&self.snapshot, self.session.name(), &mut resources)
                .await?;
            self.loader.download(&pending, &mut resources).await?;
            Ok(manifest)
        })
        .await;

        self.session.add_nested(resources)?;
        result
    }

    fn attach(&self, entry_point: &Arc<dyn EntryPoint>, run: &mut RunState) -> Result<()> {
        let session = self.session.clone();
        run.progress_subscription = Some(
            entry_point
                .progress()
                .subscribe(move |progress| session.route_progress(progress)),
        );

        let session = self.session.clone();
        run.message_subscription = Some(
            entry_point
                .messages()
                .subscribe(move |message| session.record_message(message)),
        );
        Ok(())
    }

    /// 只有本会话仍是活跃会话时才返回作用域
    fn scope_probe(&self) -> ScopeProbe {
        let active = self.active.clone();
        let id = self.session.id().to_string();
        Arc::new(move || {
            active
                .lock()
                .as_ref()
                .filter(|session| session.id() == id)
                .map(|session| ActiveScope {
                    name: session.name().to_string(),
                    completed: session.is_completed(),
                })
        })
    }

    fn ensure_not_cancelled(&self) -> Result<()> {
        if self.session.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn unload(&self) {
        if let Err(e) = call_isolated(|| self.session.set_state(SessionState::Unloading)) {
            self.session.record_fault(e);
            return;
        }
        if let Some(entry_point) = self.session.entry_point() {
            if let Err(e) = isolate(entry_point.unload()).await {
                self.session
                    .record_fault(CoreError::fault(SessionState::Unloading, e));
            }
        }
    }

    async fn cleanup(&self, run: &mut RunState) {
        let session = &self.session;
        let entry_point = session.take_entry_point();

        if let Some(ref entry_point) = entry_point {
            let detached = call_isolated(|| {
                if let Some(id) = run.progress_subscription.take() {
                    entry_point.progress().unsubscribe(&id);
                }
                if let Some(id) = run.message_subscription.take() {
                    entry_point.messages().unsubscribe(&id);
                }
                Ok(())
            });
            if let Err(e) = detached {
                self.cleanup_failed("取消订阅", e);
            }
        }

        let restored = call_isolated(|| {
            if self.environment.overrides_active() {
                self.environment.restore_overrides()
            } else {
                Ok(())
            }
        });
        if let Err(e) = restored {
            self.cleanup_failed("恢复环境设置", e);
        }

        if let Some(context) = run.context.take() {
            if let Err(e) = isolate(self.environment.teardown(&context)).await {
                self.cleanup_failed("销毁执行上下文", e);
            }
        }

        if let Some(entry_point) = entry_point {
            if let Err(e) = isolate(entry_point.dispose()).await {
                self.cleanup_failed("释放入口点", e);
            }
        }

        if let Err(e) = call_isolated(|| session.dispose_handles()) {
            self.cleanup_failed("释放资源句柄", e);
        }

        if session.state() != SessionState::Finished {
            if let Err(e) = call_isolated(|| session.set_state(SessionState::Finished)) {
                self.cleanup_failed("进入 Finished", e);
            }
        }

        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|s| s.id() == session.id()) {
            *active = None;
        }
    }

    fn cleanup_failed(&self, step: &str, error: CoreError) {
        tracing::warn!("清理步骤失败（{}）: {}", step, error);
        self.session
            .record_fault(CoreError::fault(self.session.state(), error));
    }
}

/// 编排任务没有走到完成就被丢弃（panic 展开或运行时关闭）时兜底：
/// 释放句柄、让出会话槽位并以故障结束会话。
struct CompletionGuard {
    session: Session,
    active: Arc<Mutex<Option<Session>>>,
    armed: bool,
}

impl CompletionGuard {
    fn new(session: Session, active: Arc<Mutex<Option<Session>>>) -> Self {
        Self {
            session,
            active,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let session = &self.session;
        if let Err(e) = call_isolated(|| session.dispose_handles()) {
            tracing::warn!("兜底释放资源句柄失败: {}", e);
        }

        let fault = session.record_fault(CoreError::fault(
            session.state(),
            CoreError::Internal("会话编排中断".to_string()),
        ));

        {
            let mut active = self.active.lock();
            if active.as_ref().is_some_and(|s| s.id() == session.id()) {
                *active = None;
            }
        }
        session.complete(SessionOutcome::Faulted(fault));
    }
}

/// 执行异步步骤，把 panic 转为 `CoreError::ModuleFailure`
async fn isolate<F, T>(future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(CoreError::ModuleFailure(panic_message(panic.as_ref()))),
    }
}

/// 执行同步调用，把 panic 转为 `CoreError::ModuleFailure`
fn call_isolated<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    std::panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|panic| Err(CoreError::ModuleFailure(panic_message(panic.as_ref()))))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .map(|message| format!("panic: {}", message))
        .unwrap_or_else(|| "panic".to_string())
}
