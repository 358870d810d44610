//! 会话编排集成测试
//!
//! 用模拟的清单来源、执行环境和入口点驱动完整的会话生命周期

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use minigame_core::session::{
    LogLevel, MemorySaveProvider, NoopAnalyticsLogger, ObserverList, TracingModuleLogger,
};
use minigame_core::{
    Acquired, CallbackHandle, CoreError, EntryPoint, ExecutionContext, ExecutionEnvironment,
    HostServices, LoadType, Manifest, ManifestSource, MiniGamePlatform, ModuleDescriptor,
    ModuleMessage, PlatformConfig, PlatformServices, ResourceHandle, ResourceKind,
    ResourceLocation, Result, RunContext, Session, SessionState,
};

const PLATFORM: &str = "android";
const CDN: &str = "https://cdn.example.com/games";
const REMOTE_DEP: &str = "https://cdn.example.com/shared/audio.json";
const BUILTIN_DEP: &str = "https://cdn.example.com/shared/ui.json";
const UI_BUNDLE: &str = "https://cdn.example.com/shared/ui_3f2a.bundle";

// ============================================================================
// 模拟服务
// ============================================================================

#[derive(Default)]
struct MockManifestSource {
    manifests: Mutex<HashMap<String, Manifest>>,
    sizes: Mutex<HashMap<String, u64>>,
    failing_probes: Mutex<HashSet<String>>,
    downloads: Mutex<Vec<Vec<String>>>,
    acquired: AtomicUsize,
    released: Arc<AtomicUsize>,
}

impl MockManifestSource {
    fn handle(&self, label: String) -> Box<dyn ResourceHandle> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        let released = self.released.clone();
        CallbackHandle::new(label, move || {
            released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .boxed()
    }

    fn outstanding(&self) -> usize {
        self.acquired.load(Ordering::SeqCst) - self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ManifestSource for MockManifestSource {
    async fn load_manifest(&self, location: &str) -> Result<Acquired<Manifest>> {
        let known = self.manifests.lock().get(location).cloned();
        let manifest = match known {
            Some(manifest) => manifest,
            None => {
                let bytes = tokio::fs::read(location).await.map_err(|e| {
                    CoreError::ManifestLoadFailed {
                        location: location.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Manifest::from_json(&bytes)?
            }
        };
        Ok(Acquired::new(manifest, self.handle(format!("manifest:{}", location))))
    }

    async fn probe_download_size(&self, key: &str) -> Result<Acquired<u64>> {
        if self.failing_probes.lock().contains(key) {
            return Err(CoreError::Download {
                url: key.to_string(),
                reason: "probe failed".to_string(),
            });
        }
        let size = self.sizes.lock().get(key).copied().unwrap_or(0);
        Ok(Acquired::new(size, self.handle(format!("probe:{}", key))))
    }

    async fn download(&self, keys: &[String]) -> Result<Box<dyn ResourceHandle>> {
        self.downloads.lock().push(keys.to_vec());
        let mut sizes = self.sizes.lock();
        for key in keys {
            sizes.remove(key);
        }
        drop(sizes);
        Ok(self.handle("download".to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Complete,
    WaitForCancel,
    FailLoad,
    PanicLoad,
    PanicProgress,
}

struct MockEntryPoint {
    behavior: Behavior,
    progress: ObserverList<f32>,
    messages: ObserverList<ModuleMessage>,
    context: Mutex<Option<RunContext>>,
    calls: Mutex<Vec<&'static str>>,
}

impl MockEntryPoint {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            progress: ObserverList::new(),
            messages: ObserverList::new(),
            context: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    fn context(&self) -> Option<RunContext> {
        self.context.lock().clone()
    }
}

#[async_trait]
impl EntryPoint for MockEntryPoint {
    async fn initialize(&self, context: RunContext) -> Result<()> {
        self.calls.lock().push("initialize");
        context.save.save("score", json!(42))?;
        context.logger.log(LogLevel::Info, "initialized")?;
        *self.context.lock() = Some(context);
        Ok(())
    }

    async fn load(&self) -> Result<()> {
        self.calls.lock().push("load");
        self.progress.notify(0.5);
        self.progress.notify(1.0);
        self.messages
            .notify(ModuleMessage::new("ready", json!({ "level": 1 })));

        match self.behavior {
            Behavior::FailLoad => Err(CoreError::ModuleFailure("load failed".to_string())),
            Behavior::PanicLoad => panic!("entry point exploded"),
            _ => Ok(()),
        }
    }

    async fn wait_for_end(&self, cancel: CancellationToken) -> Result<()> {
        self.calls.lock().push("wait_for_end");
        if self.behavior == Behavior::WaitForCancel {
            cancel.cancelled().await;
        }
        Ok(())
    }

    async fn unload(&self) -> Result<()> {
        self.calls.lock().push("unload");
        self.progress.notify(0.5);
        Ok(())
    }

    fn force_end(&self) -> Result<()> {
        self.calls.lock().push("force_end");
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        self.calls.lock().push("dispose");
        Ok(())
    }

    fn progress(&self) -> &ObserverList<f32> {
        if self.behavior == Behavior::PanicProgress {
            panic!("progress stream unavailable");
        }
        &self.progress
    }

    fn messages(&self) -> &ObserverList<ModuleMessage> {
        &self.messages
    }
}

struct MockEnvironment {
    behavior: Mutex<Behavior>,
    last: Mutex<Option<Arc<MockEntryPoint>>>,
    contexts: AtomicUsize,
    torn_down: AtomicUsize,
    profiles: Mutex<Vec<String>>,
    overrides: AtomicBool,
    restored: AtomicUsize,
    instances_released: Arc<AtomicUsize>,
}

impl MockEnvironment {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            last: Mutex::new(None),
            contexts: AtomicUsize::new(0),
            torn_down: AtomicUsize::new(0),
            profiles: Mutex::new(Vec::new()),
            overrides: AtomicBool::new(false),
            restored: AtomicUsize::new(0),
            instances_released: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn last_entry_point(&self) -> Arc<MockEntryPoint> {
        self.last.lock().clone().expect("入口点尚未实例化")
    }
}

#[async_trait]
impl ExecutionEnvironment for MockEnvironment {
    async fn create_isolated_context(&self, name: &str) -> Result<ExecutionContext> {
        self.contexts.fetch_add(1, Ordering::SeqCst);
        Ok(ExecutionContext::new(name))
    }

    async fn instantiate(
        &self,
        location: &ResourceLocation,
        _context: &ExecutionContext,
    ) -> Result<Acquired<Arc<dyn EntryPoint>>> {
        assert_eq!(location.kind, ResourceKind::Prefab);
        let entry_point = Arc::new(MockEntryPoint::new(*self.behavior.lock()));
        *self.last.lock() = Some(entry_point.clone());

        let released = self.instances_released.clone();
        let handle = CallbackHandle::new("instance", move || {
            released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        Ok(Acquired::new(entry_point as Arc<dyn EntryPoint>, handle.boxed()))
    }

    async fn teardown(&self, _context: &ExecutionContext) -> Result<()> {
        self.torn_down.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn apply_render_profile(&self, profile: &str) -> Result<()> {
        self.profiles.lock().push(profile.to_string());
        self.overrides.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn overrides_active(&self) -> bool {
        self.overrides.load(Ordering::SeqCst)
    }

    fn restore_overrides(&self) -> Result<()> {
        self.overrides.store(false, Ordering::SeqCst);
        self.restored.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// 测试夹具
// ============================================================================

struct Harness {
    platform: MiniGamePlatform,
    source: Arc<MockManifestSource>,
    environment: Arc<MockEnvironment>,
    saves: Arc<MemorySaveProvider>,
    _dir: TempDir,
}

fn puzzle() -> ModuleDescriptor {
    ModuleDescriptor::new("Puzzle", CDN, "1.0.0")
        .with_dependency(REMOTE_DEP)
        .with_dependency(BUILTIN_DEP)
        .with_render_profile("low_power")
}

fn arcade() -> ModuleDescriptor {
    ModuleDescriptor::new("Arcade", CDN, "2.1.0").with_dependency(BUILTIN_DEP)
}

fn puzzle_manifest(with_entry_point: bool) -> Manifest {
    let manifest = Manifest::new("puzzle").with_location(
        "puzzle_level",
        ResourceLocation::new("puzzle_level", format!("{}/puzzle_level.bundle", CDN), ResourceKind::Bundle),
    );
    if with_entry_point {
        manifest.with_location(
            "EntryPoint",
            ResourceLocation::new("EntryPoint", "Assets/Puzzle/EntryPoint.prefab", ResourceKind::Prefab),
        )
    } else {
        manifest
    }
}

fn builtin_manifest() -> Manifest {
    Manifest::new("shared-ui").with_location(
        "ui_atlas",
        ResourceLocation::new("ui_atlas", UI_BUNDLE, ResourceKind::Bundle),
    )
}

fn harness(behavior: Behavior) -> Harness {
    harness_with(behavior, true)
}

fn harness_with(behavior: Behavior, write_builtin_catalog: bool) -> Harness {
    let dir = TempDir::new().unwrap();
    let config = PlatformConfig::builder()
        .platform(PLATFORM)
        .cache_dir(dir.path().join("content"))
        .builtin_dir(dir.path().join("builtin"))
        .module(puzzle(), LoadType::Remote)
        .module(arcade(), LoadType::BuiltIn)
        .build();

    let source = Arc::new(MockManifestSource::default());
    source
        .manifests
        .lock()
        .insert(puzzle().manifest_url(PLATFORM), puzzle_manifest(true));
    source.manifests.lock().insert(
        REMOTE_DEP.to_string(),
        Manifest::new("shared-audio").with_location(
            "audio_bank",
            ResourceLocation::new("audio_bank", "https://cdn.example.com/shared/audio.bundle", ResourceKind::Bundle),
        ),
    );
    source.sizes.lock().insert("puzzle_level".to_string(), 2048);

    let environment = Arc::new(MockEnvironment::new(behavior));
    let saves = Arc::new(MemorySaveProvider::new());
    let host = HostServices {
        save: saves.clone(),
        analytics: Arc::new(NoopAnalyticsLogger),
        logger: Arc::new(TracingModuleLogger),
    };

    let services = PlatformServices::new(source.clone(), environment.clone()).with_host(host);
    let platform = MiniGamePlatform::new(config, services).unwrap();

    if write_builtin_catalog {
        let path = platform.builtin().manifest_path(BUILTIN_DEP);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, serde_json::to_vec(&builtin_manifest()).unwrap()).unwrap();
    }

    Harness {
        platform,
        source,
        environment,
        saves,
        _dir: dir,
    }
}

fn record_states(session: &Session) -> Arc<Mutex<Vec<SessionState>>> {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    session
        .state_changes()
        .subscribe(move |state| sink.lock().push(state));
    states
}

async fn wait_for_state(session: &Session, state: SessionState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while session.state() != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("等待会话状态超时");
}

// ============================================================================
// 测试
// ============================================================================

/// 一个远程依赖 + 一个内置依赖的模块完整经过全部状态
#[tokio::test]
async fn test_puzzle_runs_through_all_states() {
    let h = harness(Behavior::Complete);
    assert_eq!(
        h.platform.resolved_load_types().get(BUILTIN_DEP),
        Some(&LoadType::BuiltIn)
    );
    assert_eq!(
        h.platform.resolved_load_types().get(REMOTE_DEP),
        Some(&LoadType::Remote)
    );

    let session = h.platform.start("Puzzle", &CancellationToken::new()).unwrap();
    assert_eq!(session.state(), SessionState::None);
    assert!(session.id().starts_with("session-"));
    let states = record_states(&session);

    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = messages.clone();
    session
        .messages()
        .subscribe(move |message: ModuleMessage| sink.lock().push(message.kind));

    let outcome = session.wait().await;
    assert!(outcome.is_finished(), "{:?}", outcome);
    assert_eq!(
        *states.lock(),
        vec![
            SessionState::ResourcesLoading,
            SessionState::Initializing,
            SessionState::Loading,
            SessionState::Running,
            SessionState::Unloading,
            SessionState::Finished,
        ]
    );

    // 所有句柄都已释放
    assert_eq!(session.handle_count(), 0);
    assert_eq!(h.source.outstanding(), 0);
    assert_eq!(h.environment.instances_released.load(Ordering::SeqCst), 1);
    assert!(h.platform.active_session().is_none());

    // 只下载未缓存的内容
    assert_eq!(*h.source.downloads.lock(), vec![vec!["puzzle_level".to_string()]]);

    // 内置依赖的本地定位器已安装，资源包指向本地路径
    let local = h.platform.locators().get(BUILTIN_DEP).unwrap();
    let bundle = &local.locate("ui_atlas").unwrap()[0];
    assert!(!bundle.internal_id.starts_with("http"));

    // 进度、消息与环境设置
    assert_eq!(session.loading_progress().progress(), 1.0);
    assert_eq!(session.unloading_progress().progress(), 0.5);
    assert_eq!(*messages.lock(), vec!["ready".to_string()]);
    assert_eq!(session.last_message().unwrap().kind, "ready");
    assert_eq!(*h.environment.profiles.lock(), vec!["low_power".to_string()]);
    assert_eq!(h.environment.restored.load(Ordering::SeqCst), 1);
    assert_eq!(h.environment.torn_down.load(Ordering::SeqCst), 1);

    let entry_point = h.environment.last_entry_point();
    assert_eq!(
        entry_point.calls(),
        vec!["initialize", "load", "wait_for_end", "unload", "dispose"]
    );

    // 存档键带会话命名空间
    assert_eq!(h.saves.get("Puzzle_score"), Some(json!(42)));
}

/// 会话结束后，交给模块的服务不再可用
#[tokio::test]
async fn test_scoped_services_reject_after_completion() {
    let h = harness(Behavior::Complete);
    let session = h.platform.start("Puzzle", &CancellationToken::new()).unwrap();
    session.wait().await;

    let context = h.environment.last_entry_point().context().unwrap();
    assert_eq!(context.session_name, "Puzzle");
    let err = context.save.save("late", json!(1)).unwrap_err();
    assert!(matches!(err, CoreError::InvalidOperation(_)));
    assert!(context.logger.log(LogLevel::Warn, "late").is_err());
}

/// 已有活跃会话时不能再启动
#[tokio::test]
async fn test_start_while_active_fails() {
    let h = harness(Behavior::WaitForCancel);
    let first = h.platform.start("Puzzle", &CancellationToken::new()).unwrap();

    let err = h
        .platform
        .start("Arcade", &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, CoreError::SessionAlreadyActive(ref name) if name == "Puzzle"));

    first.cancel();
    assert!(first.wait().await.is_cancelled());

    // 会话结束后可以再次启动
    *h.environment.behavior.lock() = Behavior::Complete;
    let second = h.platform.start("Puzzle", &CancellationToken::new()).unwrap();
    assert!(second.wait().await.is_finished());
    assert_ne!(first.id(), second.id());
}

/// 未知模块和空名称
#[tokio::test]
async fn test_unknown_or_blank_module() {
    let h = harness(Behavior::Complete);

    let err = h
        .platform
        .start("Chess", &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, CoreError::ModuleNotFound(ref name) if name == "Chess"));

    let err = h.platform.start("  ", &CancellationToken::new()).unwrap_err();
    assert!(matches!(err, CoreError::InvalidArgument(_)));

    assert!(h.platform.active_session().is_none());
}

/// 加载失败：记录故障，跳过运行和卸载，清理照常执行
#[tokio::test]
async fn test_load_failure_is_captured_as_fault() {
    let h = harness(Behavior::FailLoad);
    let session = h.platform.start("Puzzle", &CancellationToken::new()).unwrap();
    let states = record_states(&session);

    let outcome = session.wait().await;
    let fault = outcome.fault().expect("应当是故障").clone();
    match fault.as_ref() {
        CoreError::Fault { stage, source } => {
            assert_eq!(*stage, SessionState::Loading);
            assert!(matches!(**source, CoreError::ModuleFailure(_)));
        }
        other => panic!("预期 Fault，实际 {:?}", other),
    }
    assert!(session.fault().is_some());

    assert_eq!(
        *states.lock(),
        vec![
            SessionState::ResourcesLoading,
            SessionState::Initializing,
            SessionState::Loading,
            SessionState::Finished,
        ]
    );
    assert_eq!(
        h.environment.last_entry_point().calls(),
        vec!["initialize", "load", "dispose"]
    );
    assert_eq!(h.environment.torn_down.load(Ordering::SeqCst), 1);
    assert_eq!(h.source.outstanding(), 0);
    assert!(h.platform.active_session().is_none());
}

/// 入口点 panic 不会影响宿主
#[tokio::test]
async fn test_entry_point_panic_is_contained() {
    let h = harness(Behavior::PanicLoad);
    let session = h.platform.start("Puzzle", &CancellationToken::new()).unwrap();

    let outcome = session.wait().await;
    let fault = outcome.fault().expect("应当是故障");
    match fault.as_ref() {
        CoreError::Fault { source, .. } => match source.as_ref() {
            CoreError::ModuleFailure(message) => assert!(message.contains("entry point exploded")),
            other => panic!("预期 ModuleFailure，实际 {:?}", other),
        },
        other => panic!("预期 Fault，实际 {:?}", other),
    }
    assert_eq!(session.handle_count(), 0);
    assert_eq!(h.environment.instances_released.load(Ordering::SeqCst), 1);
}

/// 进度流 panic：会话以故障结束，清理照常执行，之后可以再次启动
#[tokio::test]
async fn test_progress_stream_panic_still_cleans_up() {
    let h = harness(Behavior::PanicProgress);
    let session = h.platform.start("Puzzle", &CancellationToken::new()).unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), session.wait())
        .await
        .expect("会话没有完成");
    match outcome.fault().map(|f| f.as_ref()) {
        Some(CoreError::Fault { stage, source }) => {
            assert_eq!(*stage, SessionState::ResourcesLoading);
            assert!(matches!(
                **source,
                CoreError::ModuleFailure(ref message) if message.contains("progress stream unavailable")
            ));
        }
        other => panic!("预期 ModuleFailure 故障，实际 {:?}", other),
    }

    assert_eq!(session.state(), SessionState::Finished);
    assert_eq!(session.handle_count(), 0);
    assert_eq!(h.source.outstanding(), 0);
    assert_eq!(h.environment.instances_released.load(Ordering::SeqCst), 1);
    assert_eq!(h.environment.torn_down.load(Ordering::SeqCst), 1);
    assert_eq!(h.environment.last_entry_point().calls(), vec!["dispose"]);
    assert!(h.platform.active_session().is_none());

    *h.environment.behavior.lock() = Behavior::Complete;
    let next = h.platform.start("Puzzle", &CancellationToken::new()).unwrap();
    assert!(next.wait().await.is_finished());
}

/// 宿主的状态观察者 panic 不会卡住会话
#[tokio::test]
async fn test_state_observer_panic_is_contained() {
    let h = harness(Behavior::Complete);
    let session = h.platform.start("Puzzle", &CancellationToken::new()).unwrap();
    session.state_changes().subscribe(|state| {
        if state == SessionState::Initializing {
            panic!("observer exploded");
        }
    });

    let outcome = tokio::time::timeout(Duration::from_secs(5), session.wait())
        .await
        .expect("会话没有完成");
    match outcome.fault().map(|f| f.as_ref()) {
        Some(CoreError::Fault { stage, .. }) => assert_eq!(*stage, SessionState::Initializing),
        other => panic!("预期故障，实际 {:?}", other),
    }

    assert_eq!(h.environment.last_entry_point().calls(), vec!["dispose"]);
    assert_eq!(h.environment.restored.load(Ordering::SeqCst), 1);
    assert_eq!(session.handle_count(), 0);
    assert_eq!(h.source.outstanding(), 0);
    assert!(h.platform.active_session().is_none());
}

/// 运行中取消：执行卸载和清理，结局为取消
#[tokio::test]
async fn test_cancellation_while_running() {
    let h = harness(Behavior::WaitForCancel);
    let token = CancellationToken::new();
    let session = h.platform.start("Puzzle", &token).unwrap();
    let states = record_states(&session);

    wait_for_state(&session, SessionState::Running).await;
    token.cancel();

    let outcome = session.wait().await;
    assert!(outcome.is_cancelled(), "{:?}", outcome);
    assert!(session.fault().is_none());
    assert_eq!(
        *states.lock(),
        vec![
            SessionState::ResourcesLoading,
            SessionState::Initializing,
            SessionState::Loading,
            SessionState::Running,
            SessionState::Unloading,
            SessionState::Finished,
        ]
    );
    assert!(h.environment.last_entry_point().calls().contains(&"unload"));
    assert_eq!(h.source.outstanding(), 0);
}

/// 进入运行前取消：不创建执行环境，结局为取消
#[tokio::test]
async fn test_cancellation_before_running() {
    let h = harness(Behavior::Complete);
    let token = CancellationToken::new();
    let session = h.platform.start("Puzzle", &token).unwrap();
    let states = record_states(&session);
    token.cancel();

    let outcome = session.wait().await;
    assert!(outcome.is_cancelled());
    assert_eq!(
        *states.lock(),
        vec![SessionState::ResourcesLoading, SessionState::Finished]
    );
    assert_eq!(h.environment.contexts.load(Ordering::SeqCst), 0);
    assert_eq!(h.source.outstanding(), 0);
    assert!(h.platform.active_session().is_none());
}

/// 强制结束
#[tokio::test]
async fn test_force_end() {
    let h = harness(Behavior::WaitForCancel);

    // 没有活跃会话时什么也不做
    h.platform.force_end().await.unwrap();

    let session = h.platform.start("Puzzle", &CancellationToken::new()).unwrap();
    wait_for_state(&session, SessionState::Running).await;

    h.platform.force_end().await.unwrap();
    assert!(session.is_completed());
    assert!(session.outcome().unwrap().is_cancelled());
    assert_eq!(
        h.environment.last_entry_point().calls(),
        vec!["initialize", "load", "wait_for_end", "force_end", "unload", "dispose"]
    );
    assert!(h.platform.active_session().is_none());
}

/// 模块清单中没有入口点
#[tokio::test]
async fn test_missing_entry_point() {
    let h = harness(Behavior::Complete);
    h.source
        .manifests
        .lock()
        .insert(puzzle().manifest_url(PLATFORM), puzzle_manifest(false));

    let session = h.platform.start("Puzzle", &CancellationToken::new()).unwrap();
    let states = record_states(&session);
    let outcome = session.wait().await;

    match outcome.fault().map(|f| f.as_ref()) {
        Some(CoreError::Fault { stage, source }) => {
            assert_eq!(*stage, SessionState::ResourcesLoading);
            assert!(matches!(**source, CoreError::EntryPointNotFound(ref id) if id == "puzzle"));
        }
        other => panic!("预期 EntryPointNotFound 故障，实际 {:?}", other),
    }
    assert_eq!(
        *states.lock(),
        vec![SessionState::ResourcesLoading, SessionState::Finished]
    );
    // 执行上下文已创建，也已销毁
    assert_eq!(h.environment.contexts.load(Ordering::SeqCst), 1);
    assert_eq!(h.environment.torn_down.load(Ordering::SeqCst), 1);
}

/// 内置依赖缺少本地清单：资源加载阶段故障，已获取的句柄全部释放
#[tokio::test]
async fn test_missing_builtin_manifest() {
    let h = harness_with(Behavior::Complete, false);
    let session = h.platform.start("Puzzle", &CancellationToken::new()).unwrap();

    let outcome = session.wait().await;
    match outcome.fault().map(|f| f.as_ref()) {
        Some(CoreError::Fault { stage, source }) => {
            assert_eq!(*stage, SessionState::ResourcesLoading);
            assert!(matches!(**source, CoreError::ManifestLoadFailed { .. }));
        }
        other => panic!("预期 ManifestLoadFailed 故障，实际 {:?}", other),
    }
    assert!(h.source.acquired.load(Ordering::SeqCst) > 0);
    assert_eq!(h.source.outstanding(), 0);
    assert_eq!(h.environment.contexts.load(Ordering::SeqCst), 0);
}

/// 任一查询失败则资源加载失败
#[tokio::test]
async fn test_probe_failure_fails_the_step() {
    let h = harness(Behavior::Complete);
    h.source.failing_probes.lock().insert("audio_bank".to_string());

    let session = h.platform.start("Puzzle", &CancellationToken::new()).unwrap();
    let outcome = session.wait().await;

    assert!(outcome.fault().is_some());
    assert!(h.source.downloads.lock().is_empty());
    assert_eq!(h.source.outstanding(), 0);
}

/// 缓存就绪检查与预加载
#[tokio::test]
async fn test_cache_ready_and_preload() {
    let h = harness(Behavior::Complete);

    assert!(!h.platform.is_cache_ready("Puzzle").await.unwrap());
    assert_eq!(h.source.outstanding(), 0);

    h.platform.preload("Puzzle").await.unwrap();
    assert_eq!(h.source.downloads.lock().len(), 1);
    assert!(h.platform.is_cache_ready("Puzzle").await.unwrap());

    // 没有待下载内容时不调用下载
    h.platform.preload("Puzzle").await.unwrap();
    assert_eq!(h.source.downloads.lock().len(), 1);
    assert_eq!(h.source.outstanding(), 0);

    let err = h.platform.is_cache_ready("Chess").await.unwrap_err();
    assert!(matches!(err, CoreError::ModuleNotFound(_)));
}

/// 修改加载方式后解析结果随之更新
#[tokio::test]
async fn test_set_module_load_type_updates_resolution() {
    let h = harness(Behavior::Complete);
    assert_eq!(
        h.platform.builtin_manifest_urls(),
        vec![
            arcade().manifest_url(PLATFORM),
            BUILTIN_DEP.to_string(),
        ]
    );

    h.platform
        .set_module_load_type("Arcade", LoadType::Remote)
        .unwrap();
    let resolved = h.platform.resolved_load_types();
    assert_eq!(resolved.get(BUILTIN_DEP), Some(&LoadType::Remote));
    assert!(h.platform.builtin_manifest_urls().is_empty());

    h.platform
        .set_module_load_type("Puzzle", LoadType::BuiltIn)
        .unwrap();
    let resolved = h.platform.resolved_load_types();
    assert_eq!(resolved.get(BUILTIN_DEP), Some(&LoadType::BuiltIn));
    assert_eq!(resolved.get(REMOTE_DEP), Some(&LoadType::BuiltIn));
    assert_eq!(h.platform.module_load_type("Puzzle").unwrap(), LoadType::BuiltIn);

    let err = h
        .platform
        .set_module_load_type("Chess", LoadType::BuiltIn)
        .unwrap_err();
    assert!(matches!(err, CoreError::ModuleNotFound(_)));
}

/// 模块名称保持配置顺序
#[tokio::test]
async fn test_module_names_in_config_order() {
    let h = harness(Behavior::Complete);
    assert_eq!(h.platform.module_names(), vec!["Puzzle", "Arcade"]);
}
