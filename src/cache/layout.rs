//! 缓存磁盘布局
//!
//! 每个内容键（URL 的哈希）一个目录，目录内放置载荷文件和 `meta.json` 校验元数据：
//!
//! ```text
//! <root>/<sha256(url)>/<文件名>
//! <root>/<sha256(url)>/meta.json
//! ```

use std::path::{Path, PathBuf};

use reqwest::Url;
use sha2::{Digest, Sha256};

/// 校验元数据文件名
pub const META_FILE_NAME: &str = "meta.json";

/// URL 中取不到文件名时使用的载荷文件名
pub const FALLBACK_FILE_NAME: &str = "payload";

/// 计算 URL 的内容键（SHA-256 十六进制小写）
///
/// # Example
///
/// ```
/// use minigame_core::cache::cache_key;
///
/// let key = cache_key("https://cdn.example.com/a.bundle");
/// assert_eq!(key.len(), 64);
/// assert_eq!(key, cache_key("https://cdn.example.com/a.bundle"));
/// ```
pub fn cache_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

/// 从 URL 中取出文件名（忽略查询串和片段）
pub fn file_name_from_url(url: &str) -> String {
    let from_path = match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string)),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit(['/', '\\']).next())
            .map(str::to_string),
    };

    from_path
        .filter(|name| !name.is_empty() && name != "." && name != "..")
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

/// 缓存目录布局
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// URL 对应的条目目录
    pub fn entry_dir(&self, url: &str) -> PathBuf {
        self.root.join(cache_key(url))
    }

    /// URL 对应的载荷文件
    pub fn payload_path(&self, url: &str) -> PathBuf {
        self.entry_dir(url).join(file_name_from_url(url))
    }

    /// URL 对应的校验元数据文件
    pub fn meta_path(&self, url: &str) -> PathBuf {
        self.entry_dir(url).join(META_FILE_NAME)
    }

    /// 清单引用的资源包在本地的规范路径
    ///
    /// 目录取清单地址的内容键，文件名取资源包地址中的文件名。
    pub fn bundle_path(&self, manifest_url: &str, bundle_url: &str) -> PathBuf {
        self.entry_dir(manifest_url)
            .join(file_name_from_url(bundle_url))
    }
}
