//! 内置资源包存储
//!
//! 内置目录布局与内容缓存相同，每个清单地址一个目录：
//!
//! ```text
//! <builtin>/<sha256(清单地址)>/catalog.json
//! <builtin>/<sha256(清单地址)>/catalog.hash
//! <builtin>/<sha256(清单地址)>/<资源包文件名>
//! ```
//!
//! 运行时从这里加载本地清单；构建时把清单及其全部资源包预打包到这里。

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use tracing::instrument;

use crate::cache::{CacheLayout, ContentCache};
use crate::locator::manifest::Manifest;
use crate::locator::remap::{remap, LocatorRegistry};
use crate::resource::Acquired;
use crate::session::ManifestSource;
use crate::utils::{CoreError, Result};

/// 本地清单文件名
pub const MANIFEST_FILE_NAME: &str = "catalog.json";

/// 本地清单哈希文件名
pub const MANIFEST_HASH_FILE_NAME: &str = "catalog.hash";

/// 内置资源包存储
pub struct BuiltInBundleStore {
    layout: CacheLayout,
    cache: ContentCache,
    manifests: Arc<dyn ManifestSource>,
    locators: Arc<LocatorRegistry>,
}

impl BuiltInBundleStore {
    pub fn new(
        root: impl Into<PathBuf>,
        cache: ContentCache,
        manifests: Arc<dyn ManifestSource>,
        locators: Arc<LocatorRegistry>,
    ) -> Self {
        Self {
            layout: CacheLayout::new(root),
            cache,
            manifests,
            locators,
        }
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn locators(&self) -> &Arc<LocatorRegistry> {
        &self.locators
    }

    /// 清单目录
    pub fn manifest_dir(&self, url: &str) -> PathBuf {
        self.layout.entry_dir(url)
    }

    /// 本地清单路径
    pub fn manifest_path(&self, url: &str) -> PathBuf {
        self.manifest_dir(url).join(MANIFEST_FILE_NAME)
    }

    /// 本地清单哈希路径
    pub fn manifest_hash_path(&self, url: &str) -> PathBuf {
        self.manifest_dir(url).join(MANIFEST_HASH_FILE_NAME)
    }

    /// 资源包的本地路径
    pub fn bundle_path(&self, manifest_url: &str, bundle_url: &str) -> PathBuf {
        self.layout.bundle_path(manifest_url, bundle_url)
    }

    /// 加载本地清单，重映射后安装到定位器注册表（替换同一来源的旧定位器）
    ///
    /// 返回重映射后的清单以及清单加载的句柄。
    ///
    /// # Errors
    ///
    /// - 本地清单不存在：`CoreError::ManifestLoadFailed`
    /// - 清单来源加载失败
    #[instrument(skip(self))]
    pub async fn load_local_manifest(&self, url: &str) -> Result<Acquired<Manifest>> {
        let local_path = self.manifest_path(url);
        let location = local_path.to_string_lossy().into_owned();

        if !tokio::fs::try_exists(&local_path).await.unwrap_or(false) {
            tracing::error!("本地清单不存在: {}", location);
            return Err(CoreError::ManifestLoadFailed {
                location,
                reason: "本地清单不存在".to_string(),
            });
        }

        let (original, handle) = self.manifests.load_manifest(&location).await?.into_parts();
        let local = remap(&original, url, &self.layout);
        self.locators.install(url, local.clone());

        tracing::debug!("已安装内置定位器: {}", url);
        Ok(Acquired::new(local, handle))
    }

    /// 确保清单及其全部资源包已预打包
    ///
    /// 返回资源包数量。
    ///
    /// # Errors
    ///
    /// 清单中没有任何远程资源包引用，或有资源包下载失败时返回 `CoreError::Prepackage`
    #[instrument(skip(self))]
    pub async fn ensure_manifest_downloaded(&self, url: &str) -> Result<usize> {
        tokio::fs::create_dir_all(self.manifest_dir(url)).await?;

        let manifest_path = self.manifest_path(url);
        if !tokio::fs::try_exists(&manifest_path).await.unwrap_or(false) {
            self.download_to(url, &manifest_path).await?;
        }

        let hash_path = self.manifest_hash_path(url);
        if !tokio::fs::try_exists(&hash_path).await.unwrap_or(false) {
            let hash_url = url.replace(".json", ".hash");
            self.download_to(&hash_url, &hash_path).await?;
        }

        let content = tokio::fs::read(&manifest_path).await?;
        let manifest =
            Manifest::from_json(&content).map_err(|e| CoreError::ManifestLoadFailed {
                location: manifest_path.to_string_lossy().into_owned(),
                reason: e.to_string(),
            })?;

        let bundle_urls: Vec<String> = manifest.remote_bundle_urls().into_iter().collect();
        if bundle_urls.is_empty() {
            return Err(CoreError::Prepackage(format!(
                "清单 {} 没有可下载的资源包",
                url
            )));
        }

        let results = join_all(bundle_urls.iter().map(|bundle_url| {
            let target = self.bundle_path(url, bundle_url);
            async move { self.download_to(bundle_url, &target).await }
        }))
        .await;

        let failed: Vec<&str> = bundle_urls
            .iter()
            .zip(&results)
            .filter(|(_, result)| result.is_err())
            .map(|(bundle_url, _)| bundle_url.as_str())
            .collect();
        if !failed.is_empty() {
            return Err(CoreError::Prepackage(format!(
                "资源包下载失败:\n\t{}",
                failed.join("\n\t")
            )));
        }

        tracing::info!("清单 {} 预打包完成: {} 个资源包", url, bundle_urls.len());
        Ok(bundle_urls.len())
    }

    /// 只保留需要的清单：先删除多余的清单目录，再并发确保每个清单已预打包
    ///
    /// # Errors
    ///
    /// 任一清单预打包失败时返回 `CoreError::Prepackage`，列出全部失败原因
    pub async fn ensure_only_necessary_stored(&self, urls: &[String]) -> Result<()> {
        let expected: HashSet<PathBuf> = urls.iter().map(|url| self.manifest_dir(url)).collect();

        for dir in self.stored_dirs().await? {
            if !expected.contains(&dir) {
                Self::delete_dir(&dir).await;
            }
        }

        let results = join_all(urls.iter().map(|url| self.ensure_manifest_downloaded(url))).await;
        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|result| result.err())
            .map(|e| e.to_string())
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Prepackage(failures.join("\n")))
        }
    }

    /// 删除所有已存储的清单目录
    pub async fn clear(&self) -> Result<()> {
        for dir in self.stored_dirs().await? {
            Self::delete_dir(&dir).await;
        }
        Ok(())
    }

    async fn download_to(&self, url: &str, target: &std::path::Path) -> Result<()> {
        let fetched = self.cache.fetch(url).await.map_err(|e| {
            tracing::warn!("下载失败: {} ({})", url, e);
            e
        })?;
        tokio::fs::write(target, &fetched.bytes).await?;
        Ok(())
    }

    async fn stored_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        let mut entries = match tokio::fs::read_dir(self.layout.root()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                dirs.push(entry.path());
            }
        }
        Ok(dirs)
    }

    async fn delete_dir(dir: &std::path::Path) {
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => tracing::debug!("删除内置目录: {:?}", dir),
            Err(e) => tracing::warn!("删除内置目录失败 {:?}: {}", dir, e),
        }
    }
}

impl std::fmt::Debug for BuiltInBundleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltInBundleStore")
            .field("root", &self.layout.root())
            .finish_non_exhaustive()
    }
}
