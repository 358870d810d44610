//! 模块注册表
//!
//! 宿主配置提供的显式、有序的模块注册列表。

use std::collections::HashMap;

use crate::module::metadata::{LoadType, ModuleDescriptor, ModuleEntry};
use crate::utils::{CoreError, Result};

/// 模块注册表
///
/// 保持配置中的顺序；按名称查询。名称在注册表内唯一。
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    entries: Vec<ModuleEntry>,
}

impl ModuleRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 从配置条目创建注册表
    ///
    /// # Errors
    ///
    /// - 模块名称为空
    /// - 模块名称重复
    pub fn from_entries(entries: impl IntoIterator<Item = ModuleEntry>) -> Result<Self> {
        let mut registry = Self::new();
        for entry in entries {
            registry.register(entry)?;
        }
        Ok(registry)
    }

    /// 注册单个模块
    pub fn register(&mut self, entry: ModuleEntry) -> Result<()> {
        let name = entry.name();
        if name.trim().is_empty() {
            return Err(CoreError::InvalidArgument("模块名称不能为空".to_string()));
        }
        if self.contains(name) {
            return Err(CoreError::InvalidArgument(format!("模块名称重复: '{}'", name)));
        }

        tracing::debug!("模块已注册: {} ({})", name, entry.load_type);
        self.entries.push(entry);
        Ok(())
    }

    /// 模块名称列表（配置顺序）
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name().to_string()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name() == name)
    }

    /// 按名称获取模块条目
    pub fn get(&self, name: &str) -> Option<&ModuleEntry> {
        self.entries.iter().find(|e| e.name() == name)
    }

    /// 按名称获取模块描述
    pub fn descriptor(&self, name: &str) -> Result<&ModuleDescriptor> {
        self.get(name)
            .map(|e| &e.descriptor)
            .ok_or_else(|| CoreError::ModuleNotFound(name.to_string()))
    }

    pub fn entries(&self) -> &[ModuleEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 每个模块当前的加载方式
    pub fn load_types(&self) -> HashMap<String, LoadType> {
        self.entries
            .iter()
            .map(|e| (e.name().to_string(), e.load_type))
            .collect()
    }

    /// 每个模块声明的共享依赖
    pub fn dependencies(&self) -> HashMap<String, Vec<String>> {
        self.entries
            .iter()
            .map(|e| {
                (
                    e.name().to_string(),
                    e.descriptor.shared_dependencies.clone(),
                )
            })
            .collect()
    }

    /// 修改模块的加载方式，返回修改前的值
    ///
    /// # Errors
    ///
    /// 模块不存在时返回 `CoreError::ModuleNotFound`
    pub fn set_load_type(&mut self, name: &str, load_type: LoadType) -> Result<LoadType> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.descriptor.name == name)
            .ok_or_else(|| CoreError::ModuleNotFound(name.to_string()))?;

        Ok(std::mem::replace(&mut entry.load_type, load_type))
    }
}
