//! 显式的观察者注册列表
//!
//! 按订阅顺序投递；每次变化至多投递一次。

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::utils::generate_prefixed_id;

/// 订阅 ID
pub type SubscriptionId = String;

/// 观察者回调
pub type Observer<T> = Arc<dyn Fn(T) + Send + Sync>;

/// 观察者列表
pub struct ObserverList<T> {
    observers: RwLock<Vec<(SubscriptionId, Observer<T>)>>,
}

impl<T> Default for ObserverList<T> {
    fn default() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
        }
    }
}

impl<T: Clone> ObserverList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅，返回用于取消订阅的 ID
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let id = generate_prefixed_id("sub");
        self.observers.write().push((id.clone(), Arc::new(observer)));
        id
    }

    /// 取消订阅，返回订阅是否存在
    pub fn unsubscribe(&self, id: &str) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(sub_id, _)| sub_id != id);
        observers.len() != before
    }

    /// 按订阅顺序通知所有观察者
    ///
    /// 先复制快照再投递，回调中可以安全地订阅或取消订阅。
    pub fn notify(&self, value: T) {
        let snapshot: Vec<Observer<T>> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();

        for observer in snapshot {
            observer(value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    pub fn clear(&self) {
        self.observers.write().clear();
    }
}

impl<T> std::fmt::Debug for ObserverList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList")
            .field("observers", &self.observers.read().len())
            .finish()
    }
}

/// 进度报告器
///
/// 只有值发生变化时才通知观察者。
#[derive(Debug, Default)]
pub struct ProgressReporter {
    value: Mutex<f32>,
    observers: ObserverList<f32>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前进度
    pub fn progress(&self) -> f32 {
        *self.value.lock()
    }

    /// 更新进度，值被限制在 `[0, 1]`
    pub fn report(&self, progress: f32) {
        if progress.is_nan() {
            return;
        }
        let progress = progress.clamp(0.0, 1.0);

        {
            let mut value = self.value.lock();
            if *value == progress {
                return;
            }
            *value = progress;
        }
        self.observers.notify(progress);
    }

    pub fn observers(&self) -> &ObserverList<f32> {
        &self.observers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_in_subscription_order() {
        let list = ObserverList::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            list.subscribe(move |v| seen.lock().push(format!("{}{}", tag, v)));
        }

        list.notify(1);
        assert_eq!(*seen.lock(), vec!["a1", "b1", "c1"]);
    }

    #[test]
    fn test_unsubscribe() {
        let list = ObserverList::<u32>::new();
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        let id = list.subscribe(move |_| *c.lock() += 1);

        list.notify(1);
        assert!(list.unsubscribe(&id));
        assert!(!list.unsubscribe(&id));
        list.notify(2);

        assert_eq!(*count.lock(), 1);
        assert!(list.is_empty());
    }

    #[test]
    fn test_observer_may_unsubscribe_itself() {
        let list = Arc::new(ObserverList::<u32>::new());
        let id_slot: Arc<Mutex<Option<String>>> = Arc::default();

        let l = list.clone();
        let slot = id_slot.clone();
        let id = list.subscribe(move |_| {
            if let Some(id) = slot.lock().take() {
                l.unsubscribe(&id);
            }
        });
        *id_slot.lock() = Some(id);

        list.notify(1);
        assert!(list.is_empty());
    }

    #[test]
    fn test_progress_reports_only_changes() {
        let reporter = ProgressReporter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        reporter.observers().subscribe(move |p| s.lock().push(p));

        reporter.report(0.5);
        reporter.report(0.5);
        reporter.report(2.0);
        reporter.report(f32::NAN);

        assert_eq!(*seen.lock(), vec![0.5, 1.0]);
        assert_eq!(reporter.progress(), 1.0);
    }
}
