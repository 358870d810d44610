//! 内容缓存
//!
//! 按 URL 下载、校验并淘汰原始字节载荷；不了解模块的存在。

pub mod content;
pub mod layout;

pub use content::{
    CacheMeta, ContentCache, EvictionPolicy, EvictionReport, FetchOrigin, Fetched,
};
pub use layout::{cache_key, file_name_from_url, CacheLayout, META_FILE_NAME};
