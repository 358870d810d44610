//! 内置定位器重映射
//!
//! 把清单中的远程资源包位置改写为内置目录下的本地路径，并维护当前生效的定位器。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::cache::CacheLayout;
use crate::locator::manifest::{Manifest, ResourceLocation};

/// 重映射清单
///
/// 纯函数：返回新的清单，输入清单保持不变。远程资源包的 `internal_id` 改写为
/// `layout.bundle_path(original_url, internal_id)`（包括位置的依赖）；其余位置原样保留。
pub fn remap(manifest: &Manifest, original_url: &str, layout: &CacheLayout) -> Manifest {
    let locations = manifest
        .locations
        .iter()
        .map(|(key, locations)| {
            let remapped = locations
                .iter()
                .map(|location| remap_location(location, original_url, layout))
                .collect();
            (key.clone(), remapped)
        })
        .collect();

    Manifest {
        locator_id: manifest.locator_id.clone(),
        locations,
    }
}

fn remap_location(
    location: &ResourceLocation,
    original_url: &str,
    layout: &CacheLayout,
) -> ResourceLocation {
    let dependencies = location
        .dependencies
        .iter()
        .map(|dependency| remap_location(dependency, original_url, layout))
        .collect();

    let internal_id = if location.is_remote_bundle() {
        layout
            .bundle_path(original_url, &location.internal_id)
            .to_string_lossy()
            .into_owned()
    } else {
        location.internal_id.clone()
    };

    ResourceLocation {
        internal_id,
        dependencies,
        ..location.clone()
    }
}

/// 定位器注册表
///
/// 每个来源（清单地址）至多一个定位器；安装会替换而不是合并。
#[derive(Debug, Default)]
pub struct LocatorRegistry {
    locators: RwLock<HashMap<String, Arc<Manifest>>>,
}

impl LocatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 安装定位器，返回被替换的旧定位器
    pub fn install(&self, source: &str, manifest: Manifest) -> Option<Arc<Manifest>> {
        let previous = self
            .locators
            .write()
            .insert(source.to_string(), Arc::new(manifest));
        if previous.is_some() {
            tracing::debug!("替换来源 '{}' 的定位器", source);
        }
        previous
    }

    pub fn remove(&self, source: &str) -> Option<Arc<Manifest>> {
        self.locators.write().remove(source)
    }

    pub fn get(&self, source: &str) -> Option<Arc<Manifest>> {
        self.locators.read().get(source).cloned()
    }

    /// 在所有已安装的定位器中查找键
    pub fn locate(&self, key: &str) -> Vec<ResourceLocation> {
        self.locators
            .read()
            .values()
            .filter_map(|manifest| manifest.locate(key))
            .flatten()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.locators.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locators.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::cache_key;
    use crate::locator::manifest::ResourceKind;
    use std::path::PathBuf;

    const CATALOG: &str = "https://cdn/shared/ui/catalog.json";

    fn manifest() -> Manifest {
        let dependency =
            ResourceLocation::new("dep", "https://cdn/shared/ui/dep.bundle", ResourceKind::Bundle);
        Manifest::new("ui")
            .with_location(
                "atlas",
                ResourceLocation::new("atlas", "https://cdn/shared/ui/atlas.bundle", ResourceKind::Bundle)
                    .with_provider("BundleProvider")
                    .with_dependency(dependency),
            )
            .with_location(
                "icon",
                ResourceLocation::new("icon", "Assets/icon.png", ResourceKind::Asset),
            )
            .with_location(
                "http-asset",
                ResourceLocation::new("http-asset", "https://cdn/raw.png", ResourceKind::Asset),
            )
    }

    #[test]
    fn test_remap_rewrites_remote_bundles_only() {
        let layout = CacheLayout::new("/builtin");
        let original = manifest();
        let local = remap(&original, CATALOG, &layout);

        let atlas = &local.locate("atlas").unwrap()[0];
        let expected = PathBuf::from("/builtin")
            .join(cache_key(CATALOG))
            .join("atlas.bundle");
        assert_eq!(atlas.internal_id, expected.to_string_lossy());
        assert_eq!(atlas.provider_id, "BundleProvider");
        assert_eq!(atlas.dependencies.len(), 1);
        assert!(atlas.dependencies[0].internal_id.ends_with("dep.bundle"));
        assert!(!atlas.dependencies[0].internal_id.starts_with("http"));

        assert_eq!(local.locate("icon"), original.locate("icon"));
        assert_eq!(local.locate("http-asset"), original.locate("http-asset"));
        assert_eq!(local.locator_id, "ui");
    }

    #[test]
    fn test_remap_does_not_mutate_input() {
        let original = manifest();
        let snapshot = original.clone();
        let _ = remap(&original, CATALOG, &CacheLayout::new("/builtin"));
        assert_eq!(original, snapshot);
    }

    #[test]
    fn test_install_replaces_previous_locator() {
        let registry = LocatorRegistry::new();
        assert!(registry.install(CATALOG, manifest()).is_none());

        let local = remap(&manifest(), CATALOG, &CacheLayout::new("/builtin"));
        let previous = registry.install(CATALOG, local.clone()).unwrap();
        assert_eq!(*previous, manifest());

        assert_eq!(registry.len(), 1);
        assert_eq!(*registry.get(CATALOG).unwrap(), local);
        // 只能查到替换后的位置
        assert_eq!(registry.locate("atlas").len(), 1);
        assert!(!registry.locate("atlas")[0].internal_id.starts_with("http"));

        registry.remove(CATALOG);
        assert!(registry.is_empty());
    }
}
