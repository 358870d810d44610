//! 模块描述定义
//!
//! 定义宿主配置中每个小游戏模块的描述信息以及加载方式。

use serde::{Deserialize, Serialize};

use crate::utils::Result;

/// 加载方式
///
/// 既用于模块本身，也用于解析后的共享依赖。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadType {
    /// 内置：随宿主预打包到本地
    #[serde(alias = "built_in", alias = "built-in")]
    BuiltIn,
    /// 远程：运行时按需下载
    #[default]
    Remote,
}

impl LoadType {
    /// 是否为内置
    pub fn is_builtin(self) -> bool {
        matches!(self, LoadType::BuiltIn)
    }
}

impl std::fmt::Display for LoadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadType::BuiltIn => write!(f, "builtin"),
            LoadType::Remote => write!(f, "remote"),
        }
    }
}

/// 模块描述
///
/// 加载后不可变，由宿主配置持有。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// 模块名称（同时作为会话名称）
    pub name: String,

    /// 内容源地址（清单和资源包都挂在这个地址下）
    pub url: String,

    /// 模块版本（语义化版本）
    pub version: String,

    /// 共享依赖的清单地址列表
    #[serde(default)]
    pub shared_dependencies: Vec<String>,

    /// 实例化后需要应用的渲染配置
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_profile: Option<String>,
}

impl ModuleDescriptor {
    /// 创建模块描述
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            version: version.into(),
            shared_dependencies: Vec::new(),
            render_profile: None,
        }
    }

    /// 添加共享依赖
    pub fn with_dependency(mut self, manifest_url: impl Into<String>) -> Self {
        self.shared_dependencies.push(manifest_url.into());
        self
    }

    /// 设置渲染配置
    pub fn with_render_profile(mut self, profile: impl Into<String>) -> Self {
        self.render_profile = Some(profile.into());
        self
    }

    /// 计算模块清单地址
    ///
    /// 格式：`{url}/{name}/{platform}/{version}/catalog_{version}.json`
    ///
    /// # Example
    ///
    /// ```
    /// use minigame_core::module::ModuleDescriptor;
    ///
    /// let module = ModuleDescriptor::new("Puzzle", "https://cdn.example.com/games/", "1.2.0");
    /// assert_eq!(
    ///     module.manifest_url("android"),
    ///     "https://cdn.example.com/games/Puzzle/android/1.2.0/catalog_1.2.0.json"
    /// );
    /// ```
    pub fn manifest_url(&self, platform: &str) -> String {
        let base = combine_url(&[&self.url, &self.name, platform, &self.version]);
        format!("{}/catalog_{}.json", base, self.version)
    }

    /// 解析语义化版本号
    ///
    /// # Errors
    ///
    /// 版本号不是合法的 semver 时返回 `CoreError::VersionParse`
    pub fn semver(&self) -> Result<semver::Version> {
        Ok(semver::Version::parse(&self.version)?)
    }
}

/// 用单个 `/` 拼接 URL 片段，忽略空片段
pub fn combine_url(segments: &[&str]) -> String {
    let mut parts = segments.iter().filter(|s| !s.trim_matches('/').is_empty());

    let Some(first) = parts.next() else {
        return String::new();
    };

    parts.fold(first.trim_end_matches('/').to_string(), |mut acc, segment| {
        acc.push('/');
        acc.push_str(segment.trim_matches('/'));
        acc
    })
}

/// 配置中的模块条目：描述 + 加载方式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEntry {
    #[serde(flatten)]
    pub descriptor: ModuleDescriptor,

    #[serde(default)]
    pub load_type: LoadType,
}

impl ModuleEntry {
    pub fn new(descriptor: ModuleDescriptor, load_type: LoadType) -> Self {
        Self {
            descriptor,
            load_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::CoreError;

    #[test]
    fn test_load_type_serde() {
        let parsed: LoadType = serde_yaml::from_str("builtin").unwrap();
        assert_eq!(parsed, LoadType::BuiltIn);
        let parsed: LoadType = serde_yaml::from_str("built-in").unwrap();
        assert_eq!(parsed, LoadType::BuiltIn);
        assert_eq!(serde_json::to_string(&LoadType::Remote).unwrap(), "\"remote\"");
        assert_eq!(LoadType::default(), LoadType::Remote);
    }

    #[test]
    fn test_manifest_url_composition() {
        let module = ModuleDescriptor::new("Puzzle", "https://cdn.example.com", "2.0.1");
        assert_eq!(
            module.manifest_url("ios"),
            "https://cdn.example.com/Puzzle/ios/2.0.1/catalog_2.0.1.json"
        );
    }

    #[test]
    fn test_semver() {
        let module = ModuleDescriptor::new("Puzzle", "https://cdn.example.com", "2.0.1");
        assert_eq!(module.semver().unwrap(), semver::Version::new(2, 0, 1));

        let broken = ModuleDescriptor::new("Puzzle", "https://cdn.example.com", "v2");
        assert!(matches!(broken.semver(), Err(CoreError::VersionParse(_))));
    }

    #[test]
    fn test_combine_url_trims_slashes() {
        assert_eq!(combine_url(&["http://a/", "/b/", "c"]), "http://a/b/c");
        assert_eq!(combine_url(&["http://a", "", "c"]), "http://a/c");
        assert_eq!(combine_url(&[]), "");
    }

    #[test]
    fn test_module_entry_flatten() {
        let yaml = r#"
name: Puzzle
url: https://cdn.example.com
version: 1.0.0
shared_dependencies:
  - https://cdn.example.com/shared/ui/catalog.json
load_type: builtin
"#;
        let entry: ModuleEntry = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(entry.name(), "Puzzle");
        assert_eq!(entry.load_type, LoadType::BuiltIn);
        assert_eq!(entry.descriptor.shared_dependencies.len(), 1);
        assert!(entry.descriptor.render_profile.is_none());
    }
}
