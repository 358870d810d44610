//! 资源所有权

pub mod aggregator;

pub use aggregator::{Acquired, CallbackHandle, HandleAggregator, ResourceHandle};
