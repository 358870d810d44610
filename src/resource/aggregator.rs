//! 资源句柄聚合器
//!
//! 独占持有一组动态增长的资源句柄（包括嵌套的聚合器），
//! 在 `dispose` 时按后进先出的顺序各释放一次。

use std::fmt;

use crate::utils::{CoreError, Result};

/// 资源句柄
///
/// 代表一份外部分配的资源（清单加载、大小查询、下载……）的所有权。
pub trait ResourceHandle: Send {
    /// 句柄是否有效；无效句柄不会被聚合器持有，也不会被释放
    fn is_valid(&self) -> bool {
        true
    }

    /// 释放资源
    fn release(self: Box<Self>) -> Result<()>;

    /// 用于日志的描述
    fn describe(&self) -> String {
        "resource".to_string()
    }
}

type ReleaseFn = Box<dyn FnOnce() -> Result<()> + Send>;

/// 由闭包实现的资源句柄
pub struct CallbackHandle {
    label: String,
    release: Option<ReleaseFn>,
}

impl CallbackHandle {
    /// 创建句柄，释放时调用 `release`
    pub fn new<F>(label: impl Into<String>, release: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Self {
            label: label.into(),
            release: Some(Box::new(release)),
        }
    }

    /// 创建无效（空）句柄
    pub fn empty(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            release: None,
        }
    }

    pub fn boxed(self) -> Box<dyn ResourceHandle> {
        Box::new(self)
    }
}

impl ResourceHandle for CallbackHandle {
    fn is_valid(&self) -> bool {
        self.release.is_some()
    }

    fn release(mut self: Box<Self>) -> Result<()> {
        match self.release.take() {
            Some(release) => release(),
            None => Ok(()),
        }
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

impl fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackHandle")
            .field("label", &self.label)
            .field("valid", &self.release.is_some())
            .finish()
    }
}

/// 一次获取的结果：值 + 拥有它的句柄
pub struct Acquired<T> {
    pub value: T,
    pub handle: Box<dyn ResourceHandle>,
}

impl<T> Acquired<T> {
    pub fn new(value: T, handle: Box<dyn ResourceHandle>) -> Self {
        Self { value, handle }
    }

    /// 不需要释放任何资源的结果
    pub fn detached(value: T) -> Self {
        Self::new(value, CallbackHandle::empty("detached").boxed())
    }

    pub fn into_parts(self) -> (T, Box<dyn ResourceHandle>) {
        (self.value, self.handle)
    }
}

impl<T: fmt::Debug> fmt::Debug for Acquired<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acquired")
            .field("value", &self.value)
            .field("handle", &self.handle.describe())
            .finish()
    }
}

enum OwnedHandle {
    Resource(Box<dyn ResourceHandle>),
    Nested(HandleAggregator),
}

impl OwnedHandle {
    fn describe(&self) -> String {
        match self {
            OwnedHandle::Resource(handle) => handle.describe(),
            OwnedHandle::Nested(aggregator) => format!("nested({})", aggregator.len()),
        }
    }

    fn release(self) -> Result<()> {
        match self {
            // 释放时再次检查有效性，已经失效的句柄直接跳过
            OwnedHandle::Resource(handle) if handle.is_valid() => handle.release(),
            OwnedHandle::Resource(_) => Ok(()),
            OwnedHandle::Nested(mut aggregator) => aggregator.dispose(),
        }
    }
}

/// 资源句柄聚合器
///
/// # Example
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use minigame_core::resource::{CallbackHandle, HandleAggregator};
///
/// let order = Arc::new(Mutex::new(Vec::new()));
/// let mut aggregator = HandleAggregator::new();
/// for i in 0..3 {
///     let order = order.clone();
///     aggregator
///         .add(CallbackHandle::new(format!("h{}", i), move || {
///             order.lock().unwrap().push(i);
///             Ok(())
///         }).boxed())
///         .unwrap();
/// }
///
/// aggregator.dispose().unwrap();
/// assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
/// ```
#[derive(Default)]
pub struct HandleAggregator {
    handles: Vec<OwnedHandle>,
    disposed: bool,
}

impl HandleAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加一个句柄；无效句柄直接忽略
    ///
    /// # Errors
    ///
    /// 聚合器已释放时返回 `CoreError::Disposed`
    pub fn add(&mut self, handle: Box<dyn ResourceHandle>) -> Result<()> {
        self.ensure_alive()?;
        if handle.is_valid() {
            self.handles.push(OwnedHandle::Resource(handle));
        } else {
            tracing::trace!("忽略无效句柄: {}", handle.describe());
        }
        Ok(())
    }

    /// 批量添加句柄
    pub fn add_all<I>(&mut self, handles: I) -> Result<()>
    where
        I: IntoIterator<Item = Box<dyn ResourceHandle>>,
    {
        self.ensure_alive()?;
        for handle in handles {
            self.add(handle)?;
        }
        Ok(())
    }

    /// 添加嵌套的聚合器，释放时递归释放
    pub fn add_nested(&mut self, aggregator: HandleAggregator) -> Result<()> {
        self.ensure_alive()?;
        if !aggregator.is_disposed() {
            self.handles.push(OwnedHandle::Nested(aggregator));
        }
        Ok(())
    }

    /// 当前持有的（顶层）句柄数
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// 按添加顺序的逆序释放所有句柄
    ///
    /// 幂等：第二次调用不做任何事。单个句柄释放失败不影响其余句柄，返回第一个失败。
    pub fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;

        let mut first_error = None;
        while let Some(handle) = self.handles.pop() {
            let description = handle.describe();
            if let Err(e) = handle.release() {
                tracing::warn!("释放资源句柄失败 ({}): {}", description, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.disposed {
            Err(CoreError::Disposed("HandleAggregator"))
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for HandleAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handles: Vec<String> = self.handles.iter().map(OwnedHandle::describe).collect();
        f.debug_struct("HandleAggregator")
            .field("handles", &handles)
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl Drop for HandleAggregator {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            tracing::warn!("聚合器在丢弃时释放失败: {}", e);
        }
    }
}
