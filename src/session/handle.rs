//! 会话句柄
//!
//! 一次模块运行。`start` 立即返回句柄，宿主通过它观察状态、进度、消息和最终结果。

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::resource::{HandleAggregator, ResourceHandle};
use crate::session::observer::{ObserverList, ProgressReporter};
use crate::session::services::{EntryPoint, ModuleMessage};
use crate::session::state::SessionState;
use crate::utils::{fields, generate_prefixed_id, CoreError, Result};

/// 会话结局
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    /// 正常结束
    Finished,
    /// 被取消
    Cancelled,
    /// 编排过程中出现故障
    Faulted(Arc<CoreError>),
}

impl SessionOutcome {
    pub fn is_finished(&self) -> bool {
        matches!(self, SessionOutcome::Finished)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionOutcome::Cancelled)
    }

    pub fn fault(&self) -> Option<&Arc<CoreError>> {
        match self {
            SessionOutcome::Faulted(e) => Some(e),
            _ => None,
        }
    }
}

struct SessionInner {
    id: String,
    name: String,
    started_at: DateTime<Utc>,
    state: RwLock<SessionState>,
    fault: RwLock<Option<Arc<CoreError>>>,
    last_message: RwLock<Option<ModuleMessage>>,
    loading: ProgressReporter,
    unloading: ProgressReporter,
    state_observers: ObserverList<SessionState>,
    message_observers: ObserverList<ModuleMessage>,
    handles: Mutex<HandleAggregator>,
    entry_point: RwLock<Option<Arc<dyn EntryPoint>>>,
    cancel: CancellationToken,
    completion: watch::Sender<Option<SessionOutcome>>,
}

/// 会话句柄（可克隆，共享同一会话）
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// 创建会话；取消令牌是调用方令牌的子令牌
    pub(crate) fn new(name: impl Into<String>, parent: &CancellationToken) -> Self {
        let (completion, _) = watch::channel(None);
        Self {
            inner: Arc::new(SessionInner {
                id: generate_prefixed_id("session"),
                name: name.into(),
                started_at: Utc::now(),
                state: RwLock::new(SessionState::None),
                fault: RwLock::new(None),
                last_message: RwLock::new(None),
                loading: ProgressReporter::new(),
                unloading: ProgressReporter::new(),
                state_observers: ObserverList::new(),
                message_observers: ObserverList::new(),
                handles: Mutex::new(HandleAggregator::new()),
                entry_point: RwLock::new(None),
                cancel: parent.child_token(),
                completion,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// 启动时间
    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// 当前状态
    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    /// 记录的故障（第一个）
    pub fn fault(&self) -> Option<Arc<CoreError>> {
        self.inner.fault.read().clone()
    }

    /// 模块最近发出的消息
    pub fn last_message(&self) -> Option<ModuleMessage> {
        self.inner.last_message.read().clone()
    }

    /// 加载进度
    pub fn loading_progress(&self) -> &ProgressReporter {
        &self.inner.loading
    }

    /// 卸载进度
    pub fn unloading_progress(&self) -> &ProgressReporter {
        &self.inner.unloading
    }

    /// 状态变化观察者
    pub fn state_changes(&self) -> &ObserverList<SessionState> {
        &self.inner.state_observers
    }

    /// 模块消息观察者
    pub fn messages(&self) -> &ObserverList<ModuleMessage> {
        &self.inner.message_observers
    }

    /// 聚合器当前持有的句柄数
    pub fn handle_count(&self) -> usize {
        self.inner.handles.lock().len()
    }

    /// 取消会话；在 `Running` 之前取消时，后续步骤不再执行，清理照常进行
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// 完成信号是否已触发
    pub fn is_completed(&self) -> bool {
        self.inner.completion.borrow().is_some()
    }

    /// 结局（未完成时为 None）
    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.inner.completion.borrow().clone()
    }

    /// 等待会话完成
    pub async fn wait(&self) -> SessionOutcome {
        let mut receiver = self.inner.completion.subscribe();
        let outcome = match receiver.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(SessionOutcome::Finished),
            // 发送端与会话同生命周期，这里不会发生
            Err(_) => SessionOutcome::Cancelled,
        };
        outcome
    }

    // ------------------------------------------------------------------
    // 编排内部使用
    // ------------------------------------------------------------------

    /// 推进状态并通知观察者
    pub(crate) fn set_state(&self, next: SessionState) -> Result<()> {
        let previous = {
            let mut state = self.inner.state.write();
            let previous = *state;
            *state = previous.transition(next)?;
            previous
        };

        tracing::debug!(
            session = %self.inner.name,
            session_id = %self.inner.id,
            "会话状态: {} -> {}",
            previous,
            next
        );
        tracing::Span::current().record(fields::STATE, tracing::field::display(next));
        self.inner.state_observers.notify(next);
        Ok(())
    }

    /// 记录故障，只保留第一个
    pub(crate) fn record_fault(&self, error: CoreError) -> Arc<CoreError> {
        let mut fault = self.inner.fault.write();
        match fault.as_ref() {
            Some(existing) => {
                tracing::warn!(session = %self.inner.name, "后续错误（已有故障）: {}", error);
                existing.clone()
            }
            None => {
                tracing::error!(
                    session = %self.inner.name,
                    error_code = error.error_code(),
                    "会话故障: {}",
                    error
                );
                tracing::Span::current().record(fields::ERROR_CODE, error.error_code());
                let error = Arc::new(error);
                *fault = Some(error.clone());
                error
            }
        }
    }

    pub(crate) fn record_message(&self, message: ModuleMessage) {
        *self.inner.last_message.write() = Some(message.clone());
        self.inner.message_observers.notify(message);
    }

    /// 按当前状态转发入口点进度：加载中 → 加载进度，卸载中 → 卸载进度，其余丢弃
    pub(crate) fn route_progress(&self, progress: f32) {
        match self.state() {
            SessionState::Loading => self.inner.loading.report(progress),
            SessionState::Unloading => self.inner.unloading.report(progress),
            _ => {}
        }
    }

    pub(crate) fn add_handle(&self, handle: Box<dyn ResourceHandle>) -> Result<()> {
        self.inner.handles.lock().add(handle)
    }

    pub(crate) fn add_nested(&self, aggregator: HandleAggregator) -> Result<()> {
        self.inner.handles.lock().add_nested(aggregator)
    }

    pub(crate) fn dispose_handles(&self) -> Result<()> {
        self.inner.handles.lock().dispose()
    }

    pub(crate) fn set_entry_point(&self, entry_point: Arc<dyn EntryPoint>) {
        *self.inner.entry_point.write() = Some(entry_point);
    }

    pub(crate) fn entry_point(&self) -> Option<Arc<dyn EntryPoint>> {
        self.inner.entry_point.read().clone()
    }

    pub(crate) fn take_entry_point(&self) -> Option<Arc<dyn EntryPoint>> {
        self.inner.entry_point.write().take()
    }

    /// 触发完成信号（只生效一次）
    pub(crate) fn complete(&self, outcome: SessionOutcome) {
        self.inner.completion.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(outcome);
            true
        });
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("completed", &self.is_completed())
            .finish()
    }
}
