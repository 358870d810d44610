//! 会话生命周期状态

use serde::{Deserialize, Serialize};

use crate::utils::{CoreError, Result};

/// 会话状态
///
/// 线性推进，没有回环：
/// `None → ResourcesLoading → Initializing → Loading → Running → Unloading → Finished`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    None,
    ResourcesLoading,
    Initializing,
    Loading,
    Running,
    Unloading,
    Finished,
}

impl SessionState {
    /// 全部状态（按推进顺序）
    pub const ALL: [SessionState; 7] = [
        SessionState::None,
        SessionState::ResourcesLoading,
        SessionState::Initializing,
        SessionState::Loading,
        SessionState::Running,
        SessionState::Unloading,
        SessionState::Finished,
    ];

    /// 是否允许转换到 `next`：只能向前
    pub fn can_transition_to(self, next: SessionState) -> bool {
        next > self
    }

    /// 校验转换
    ///
    /// # Errors
    ///
    /// 目标状态等于或早于当前状态时返回 `CoreError::InvalidStateTransition`
    pub fn transition(self, next: SessionState) -> Result<SessionState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidStateTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn is_terminal(self) -> bool {
        self == SessionState::Finished
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::None => "none",
            SessionState::ResourcesLoading => "resources_loading",
            SessionState::Initializing => "initializing",
            SessionState::Loading => "loading",
            SessionState::Running => "running",
            SessionState::Unloading => "unloading",
            SessionState::Finished => "finished",
        };
        write!(f, "{}", name)
    }
}
