//! 会话
//!
//! 同一时刻最多一个活跃会话。会话依次经过：
//!
//! ```text
//! None -> ResourcesLoading -> Initializing -> Loading -> Running -> Unloading -> Finished
//! ```
//!
//! 失败或取消时会跳过中间状态，但清理总会执行并最终进入 `Finished`。

pub mod context;
pub mod handle;
pub mod manager;
pub mod observer;
pub mod services;
pub mod state;

pub use context::{
    ActiveScope, AnalyticsLogger, AnalyticsValue, HostServices, LogLevel, MemorySaveProvider,
    ModuleLogger, NoopAnalyticsLogger, NoopSaveProvider, RunContext, SaveProvider, ScopeProbe,
    TracingModuleLogger,
};
pub use handle::{Session, SessionOutcome};
pub use manager::{ModuleSnapshot, SessionDeps, SessionManager};
pub use observer::{ObserverList, ProgressReporter, SubscriptionId};
pub use services::{
    EntryPoint, ExecutionContext, ExecutionEnvironment, ManifestSource, ModuleMessage,
};
pub use state::SessionState;
