//! 模块管理
//!
//! - 模块描述与加载方式
//! - 显式注册列表
//! - 共享依赖加载方式解析

pub mod metadata;
pub mod registry;
pub mod resolver;

pub use metadata::{combine_url, LoadType, ModuleDescriptor, ModuleEntry};
pub use registry::ModuleRegistry;
pub use resolver::LoadTypeResolver;
