//! 清单与定位器
//!
//! - 清单模型
//! - 远程资源包到内置路径的重映射
//! - 内置资源包存储（加载本地清单、预打包）

pub mod builtin;
pub mod manifest;
pub mod remap;

pub use builtin::{BuiltInBundleStore, MANIFEST_FILE_NAME, MANIFEST_HASH_FILE_NAME};
pub use manifest::{Manifest, ResourceKind, ResourceLocation, ENTRY_POINT_ADDRESS};
pub use remap::{remap, LocatorRegistry};
