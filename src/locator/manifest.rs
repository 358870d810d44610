//! 清单模型
//!
//! 清单把键映射到一组资源位置；资源位置可能由资源包承载。

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// 模块入口点在清单中的地址
pub const ENTRY_POINT_ADDRESS: &str = "EntryPoint";

/// 资源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// 资源包
    Bundle,
    /// 普通资源
    Asset,
    /// 预制体（可实例化为入口点）
    Prefab,
    #[default]
    Other,
}

/// 资源位置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLocation {
    /// 主键
    pub primary_key: String,

    /// 内部标识：资源包为其地址或本地路径
    pub internal_id: String,

    /// 提供者标识
    #[serde(default)]
    pub provider_id: String,

    #[serde(default)]
    pub kind: ResourceKind,

    /// 依赖的其他位置
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<ResourceLocation>,
}

impl ResourceLocation {
    pub fn new(
        primary_key: impl Into<String>,
        internal_id: impl Into<String>,
        kind: ResourceKind,
    ) -> Self {
        Self {
            primary_key: primary_key.into(),
            internal_id: internal_id.into(),
            provider_id: String::new(),
            kind,
            dependencies: Vec::new(),
        }
    }

    pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = provider_id.into();
        self
    }

    pub fn with_dependency(mut self, dependency: ResourceLocation) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// 是否为远程资源包引用
    pub fn is_remote_bundle(&self) -> bool {
        self.kind == ResourceKind::Bundle && self.internal_id.starts_with("http")
    }
}

/// 清单
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// 定位器标识（同一来源的定位器共享）
    pub locator_id: String,

    #[serde(default)]
    pub locations: BTreeMap<String, Vec<ResourceLocation>>,
}

impl Manifest {
    pub fn new(locator_id: impl Into<String>) -> Self {
        Self {
            locator_id: locator_id.into(),
            locations: BTreeMap::new(),
        }
    }

    /// 追加一个位置
    pub fn with_location(mut self, key: impl Into<String>, location: ResourceLocation) -> Self {
        self.locations.entry(key.into()).or_default().push(location);
        self
    }

    /// 按键查找位置
    pub fn locate(&self, key: &str) -> Option<&[ResourceLocation]> {
        self.locations.get(key).map(Vec::as_slice)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.locations.keys().map(String::as_str)
    }

    /// 入口点位置
    pub fn entry_point(&self) -> Option<&ResourceLocation> {
        self.locate(ENTRY_POINT_ADDRESS).and_then(|locations| locations.first())
    }

    /// 清单中引用的全部远程资源包地址（去重）
    pub fn remote_bundle_urls(&self) -> BTreeSet<String> {
        let mut urls = BTreeSet::new();
        let mut pending: Vec<&ResourceLocation> = self.locations.values().flatten().collect();
        while let Some(location) = pending.pop() {
            if location.is_remote_bundle() {
                urls.insert(location.internal_id.clone());
            }
            pending.extend(&location.dependencies);
        }
        urls
    }

    pub fn from_json(bytes: &[u8]) -> crate::utils::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
