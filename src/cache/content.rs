//! 内容缓存
//!
//! 按 URL 下载原始字节并缓存到磁盘：
//!
//! - 有缓存副本时发起条件请求（`If-None-Match` / `If-Modified-Since`）
//! - 304 直接返回缓存内容，不写磁盘
//! - 成功响应原子地写入载荷和校验元数据
//! - 网络或协议错误时回退到陈旧副本（记录警告），没有副本则返回下载错误
//! - 按年龄和总大小两阶段淘汰

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::cache::layout::{cache_key, file_name_from_url, CacheLayout, META_FILE_NAME};
use crate::core::config::CacheConfig;
use crate::utils::{fields, generate_id, CoreError, Result};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// 校验元数据（`meta.json`）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

impl CacheMeta {
    fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// 内容来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOrigin {
    /// 完整下载并已写入缓存
    Downloaded,
    /// 服务器返回 304，使用缓存副本
    NotModified,
    /// 请求失败，降级使用陈旧副本
    Stale,
}

/// 获取结果
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Bytes,
    pub origin: FetchOrigin,
}

/// 淘汰策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    pub max_age_days: u64,
    pub max_total_bytes: u64,
}

impl EvictionPolicy {
    pub fn new(max_age_days: u64, max_total_bytes: u64) -> Self {
        Self {
            max_age_days,
            max_total_bytes,
        }
    }

    fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_days.saturating_mul(SECS_PER_DAY))
    }
}

impl From<&CacheConfig> for EvictionPolicy {
    fn from(config: &CacheConfig) -> Self {
        Self::new(config.max_age_days, config.max_total_bytes)
    }
}

/// 淘汰结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// 因过期删除的条目数
    pub expired: usize,
    /// 因超出容量删除的条目数
    pub evicted_for_size: usize,
    /// 删除失败（已跳过）的条目数
    pub failed: usize,
    /// 淘汰后剩余的总字节数
    pub remaining_bytes: u64,
}

/// 磁盘上的一个缓存条目
#[derive(Debug)]
struct EntryInfo {
    dir: PathBuf,
    size: u64,
    modified: SystemTime,
}

/// 内容缓存
#[derive(Debug, Clone)]
pub struct ContentCache {
    client: Client,
    layout: CacheLayout,
}

impl ContentCache {
    /// 创建内容缓存
    ///
    /// # Errors
    ///
    /// HTTP 客户端构建失败时返回 `CoreError::Http`
    pub fn new(root: impl Into<PathBuf>, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self::with_client(root, client))
    }

    /// 使用已有的 HTTP 客户端创建
    pub fn with_client(root: impl Into<PathBuf>, client: Client) -> Self {
        Self {
            client,
            layout: CacheLayout::new(root),
        }
    }

    /// 从缓存配置创建
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        Self::new(
            &config.cache_dir,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// 获取 URL 对应的内容
    ///
    /// 对不同 URL 并发调用是安全的。
    ///
    /// # Errors
    ///
    /// 请求失败且没有缓存副本时返回 `CoreError::Download`
    #[instrument(skip(self), fields(cache_key = %cache_key(url), bytes = tracing::field::Empty))]
    pub async fn fetch(&self, url: &str) -> Result<Fetched> {
        let payload_path = self.layout.payload_path(url);
        let meta_path = self.layout.meta_path(url);

        let has_payload = tokio::fs::try_exists(&payload_path).await.unwrap_or(false);
        let meta = if has_payload {
            Self::load_meta(&meta_path).await
        } else {
            CacheMeta::default()
        };

        let mut request = self.client.get(url);
        if let Some(ref etag) = meta.etag {
            request = request.header(IF_NONE_MATCH, etag.as_str());
        }
        if let Some(ref last_modified) = meta.last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified.as_str());
        }
        if !meta.is_empty() {
            tracing::debug!("发起条件请求: {}", url);
        }

        let failure = match request.send().await {
            Ok(response) if response.status() == StatusCode::NOT_MODIFIED && has_payload => {
                let bytes = tokio::fs::read(&payload_path).await?;
                tracing::debug!("内容未修改，使用缓存: {}", url);
                return Ok(Fetched {
                    bytes: Bytes::from(bytes),
                    origin: FetchOrigin::NotModified,
                });
            }
            Ok(response) if response.status().is_success() => {
                let new_meta = CacheMeta {
                    etag: Self::header_string(&response, ETAG),
                    last_modified: Self::header_string(&response, LAST_MODIFIED),
                };
                match response.bytes().await {
                    Ok(bytes) => {
                        self.persist(url, &bytes, &new_meta).await?;
                        tracing::Span::current().record(fields::BYTES, bytes.len());
                        tracing::debug!("下载完成: {} ({} 字节)", url, bytes.len());
                        return Ok(Fetched {
                            bytes,
                            origin: FetchOrigin::Downloaded,
                        });
                    }
                    Err(e) => format!("读取响应体失败: {}", e),
                }
            }
            Ok(response) => format!("HTTP {}", response.status()),
            Err(e) => e.to_string(),
        };

        if has_payload {
            if let Ok(bytes) = tokio::fs::read(&payload_path).await {
                tracing::warn!(url = %url, reason = %failure, "下载失败，使用陈旧的缓存副本");
                return Ok(Fetched {
                    bytes: Bytes::from(bytes),
                    origin: FetchOrigin::Stale,
                });
            }
        }

        tracing::error!(url = %url, reason = %failure, "下载失败且没有缓存副本");
        Err(CoreError::Download {
            url: url.to_string(),
            reason: failure,
        })
    }

    /// URL 是否已有缓存副本
    pub async fn contains(&self, url: &str) -> bool {
        tokio::fs::try_exists(self.layout.payload_path(url))
            .await
            .unwrap_or(false)
    }

    /// 按策略淘汰
    pub async fn evict(&self, policy: EvictionPolicy) -> EvictionReport {
        self.evict_at(SystemTime::now(), policy).await
    }

    /// 以给定时间为“现在”进行两阶段淘汰
    ///
    /// 1. 删除最后写入时间超过 `max_age_days` 的条目，不论容量
    /// 2. 剩余总大小仍超过 `max_total_bytes` 时，按最后写入时间从旧到新删除，直到不超限
    ///
    /// 单个条目删除失败只记录警告并跳过。
    #[instrument(skip(self))]
    pub async fn evict_at(&self, now: SystemTime, policy: EvictionPolicy) -> EvictionReport {
        match self.scan_entries().await {
            Ok(entries) => Self::evict_entries(entries, now, policy).await,
            Err(e) => {
                tracing::warn!("无法扫描缓存目录 {:?}: {}", self.layout.root(), e);
                EvictionReport::default()
            }
        }
    }

    async fn evict_entries(
        entries: Vec<EntryInfo>,
        now: SystemTime,
        policy: EvictionPolicy,
    ) -> EvictionReport {
        let mut report = EvictionReport::default();
        let max_age = policy.max_age();
        let mut total: u64 = entries.iter().map(|e| e.size).sum();
        let mut survivors = Vec::with_capacity(entries.len());

        for entry in entries {
            let age = now.duration_since(entry.modified).unwrap_or_default();
            if age <= max_age {
                survivors.push(entry);
                continue;
            }

            match tokio::fs::remove_dir_all(&entry.dir).await {
                Ok(()) => {
                    total = total.saturating_sub(entry.size);
                    report.expired += 1;
                    tracing::debug!("删除过期缓存条目: {:?}", entry.dir);
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!("删除过期缓存条目失败 {:?}: {}", entry.dir, e);
                }
            }
        }

        if total > policy.max_total_bytes {
            survivors.sort_by_key(|e| e.modified);

            for entry in survivors {
                if total <= policy.max_total_bytes {
                    break;
                }
                match tokio::fs::remove_dir_all(&entry.dir).await {
                    Ok(()) => {
                        total = total.saturating_sub(entry.size);
                        report.evicted_for_size += 1;
                        tracing::debug!("容量超限，删除缓存条目: {:?}", entry.dir);
                    }
                    Err(e) => {
                        report.failed += 1;
                        tracing::warn!("删除缓存条目失败 {:?}: {}", entry.dir, e);
                    }
                }
            }
        }

        report.remaining_bytes = total;
        tracing::info!(
            "缓存淘汰完成: 过期 {} 个, 超限 {} 个, 失败 {} 个, 剩余 {} 字节",
            report.expired,
            report.evicted_for_size,
            report.failed,
            report.remaining_bytes
        );
        report
    }

    /// 清空整个缓存目录
    pub async fn clear_all(&self) -> Result<()> {
        let root = self.layout.root();
        match tokio::fs::remove_dir_all(root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(root).await?;
        tracing::info!("缓存已清空: {:?}", root);
        Ok(())
    }

    /// 在同级暂存目录写好完整条目，再整体替换旧条目
    ///
    /// 载荷和元数据要么都是新的，要么都是旧的。
    async fn persist(&self, url: &str, bytes: &[u8], meta: &CacheMeta) -> Result<()> {
        let root = self.layout.root();
        tokio::fs::create_dir_all(root).await?;

        let key = cache_key(url);
        let suffix = generate_id();
        let staged = root.join(format!(".{}.{}.staged", key, suffix));
        let backup = root.join(format!(".{}.{}.old", key, suffix));

        let result: Result<()> = async {
            tokio::fs::create_dir_all(&staged).await?;
            tokio::fs::write(staged.join(file_name_from_url(url)), bytes).await?;
            tokio::fs::write(staged.join(META_FILE_NAME), serde_json::to_vec_pretty(meta)?).await?;
            Self::replace_entry(&staged, &self.layout.entry_dir(url), &backup).await
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_dir_all(&staged).await;
        }
        result
    }

    /// 用 `staged` 替换 `target`：旧目录先移到 `backup`，替换失败时移回
    async fn replace_entry(staged: &Path, target: &Path, backup: &Path) -> Result<()> {
        let had_previous = match tokio::fs::rename(target, backup).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = tokio::fs::rename(staged, target).await {
            if had_previous {
                if let Err(restore) = tokio::fs::rename(backup, target).await {
                    tracing::error!("恢复旧缓存条目失败 {:?}: {}", target, restore);
                }
            }
            return Err(e.into());
        }

        if had_previous {
            if let Err(e) = tokio::fs::remove_dir_all(backup).await {
                tracing::warn!("删除旧缓存条目失败 {:?}: {}", backup, e);
            }
        }
        Ok(())
    }

    async fn load_meta(path: &Path) -> CacheMeta {
        match tokio::fs::read(path).await {
            Ok(content) => serde_json::from_slice(&content).unwrap_or_else(|e| {
                tracing::debug!("校验元数据损坏 {:?}: {}", path, e);
                CacheMeta::default()
            }),
            Err(_) => CacheMeta::default(),
        }
    }

    fn header_string(
        response: &reqwest::Response,
        name: reqwest::header::HeaderName,
    ) -> Option<String> {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    async fn scan_entries(&self) -> std::io::Result<Vec<EntryInfo>> {
        let mut entries = Vec::new();
        let mut dirs = match tokio::fs::read_dir(self.layout.root()).await {
            Ok(dirs) => dirs,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e),
        };

        while let Some(dir) = dirs.next_entry().await? {
            // 以 . 开头的是写入中的暂存目录
            let staging = dir.file_name().to_string_lossy().starts_with('.');
            if staging || !dir.file_type().await?.is_dir() {
                continue;
            }
            match Self::measure(&dir.path()).await {
                Ok(Some(info)) => entries.push(info),
                Ok(None) => {}
                Err(e) => tracing::warn!("无法读取缓存条目 {:?}: {}", dir.path(), e),
            }
        }

        Ok(entries)
    }

    /// 条目大小为目录内文件大小之和，时间取最新的写入时间；空目录返回 None
    async fn measure(dir: &Path) -> std::io::Result<Option<EntryInfo>> {
        let mut files = tokio::fs::read_dir(dir).await?;
        let mut size = 0;
        let mut modified: Option<SystemTime> = None;

        while let Some(file) = files.next_entry().await? {
            let metadata = file.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            size += metadata.len();
            let written = metadata.modified()?;
            modified = Some(modified.map_or(written, |m| m.max(written)));
        }

        Ok(modified.map(|modified| EntryInfo {
            dir: dir.to_path_buf(),
            size,
            modified,
        }))
    }
}
