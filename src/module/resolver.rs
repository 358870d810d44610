//! 共享依赖加载方式解析器
//!
//! 通过引用计数决定每个共享依赖是预打包到本地（内置）还是运行时下载（远程）：
//! 只要有一个内置模块引用了某个依赖，该依赖就是内置的。
//!
//! 生命周期：构造 → `resolve` → 若干次 `apply_change`。每个配置快照一个实例。

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::instrument;

use crate::module::metadata::LoadType;
use crate::utils::{CoreError, Result};

/// 加载方式解析器
#[derive(Debug, Clone)]
pub struct LoadTypeResolver {
    /// 模块名称 -> 去重后的共享依赖
    dependencies: HashMap<String, BTreeSet<String>>,

    /// 模块名称 -> 当前加载方式
    module_types: HashMap<String, LoadType>,

    /// 共享依赖 -> 引用它的内置模块数量
    ref_counts: BTreeMap<String, usize>,
}

impl LoadTypeResolver {
    /// 创建解析器
    ///
    /// 所有模块初始为远程，所有依赖的引用计数为 0。
    pub fn new(dependencies: HashMap<String, Vec<String>>) -> Self {
        let dependencies: HashMap<String, BTreeSet<String>> = dependencies
            .into_iter()
            .map(|(module, deps)| (module, deps.into_iter().collect()))
            .collect();

        let ref_counts = dependencies
            .values()
            .flatten()
            .map(|dep| (dep.clone(), 0))
            .collect();

        let module_types = dependencies
            .keys()
            .map(|module| (module.clone(), LoadType::Remote))
            .collect();

        Self {
            dependencies,
            module_types,
            ref_counts,
        }
    }

    /// 全量解析
    ///
    /// 清空并重建引用计数表。未出现在 `load_types` 中的模块视为远程。
    ///
    /// # Errors
    ///
    /// `load_types` 中包含未知模块时返回 `CoreError::ModuleNotFound`，此时解析器状态不变。
    #[instrument(skip_all, fields(modules = load_types.len()))]
    pub fn resolve(&mut self, load_types: &HashMap<String, LoadType>) -> Result<()> {
        if let Some(unknown) = load_types
            .keys()
            .find(|module| !self.dependencies.contains_key(*module))
        {
            return Err(CoreError::ModuleNotFound(unknown.clone()));
        }

        self.ref_counts.values_mut().for_each(|count| *count = 0);

        for (module, deps) in &self.dependencies {
            let load_type = load_types.get(module).copied().unwrap_or_default();
            self.module_types.insert(module.clone(), load_type);

            if load_type.is_builtin() {
                for dep in deps {
                    *self.ref_counts.entry(dep.clone()).or_insert(0) += 1;
                }
            }
        }

        tracing::debug!(
            "加载方式解析完成: {} 个共享依赖中 {} 个为内置",
            self.ref_counts.len(),
            self.ref_counts.values().filter(|c| **c > 0).count()
        );
        Ok(())
    }

    /// 增量更新单个模块的加载方式
    ///
    /// 结果与对最终加载方式集合调用 `resolve` 完全一致。
    ///
    /// # Errors
    ///
    /// - 未知模块：`CoreError::ModuleNotFound`
    /// - `old` 与记录的加载方式不一致，或引用计数下溢：`CoreError::InvalidOperation`
    #[instrument(skip(self))]
    pub fn apply_change(&mut self, module: &str, old: LoadType, new: LoadType) -> Result<()> {
        let deps = self
            .dependencies
            .get(module)
            .ok_or_else(|| CoreError::ModuleNotFound(module.to_string()))?;

        let current = self
            .module_types
            .get(module)
            .copied()
            .unwrap_or_default();
        if current != old {
            return Err(CoreError::InvalidOperation(format!(
                "模块 '{}' 当前加载方式为 {}，而不是 {}",
                module, current, old
            )));
        }
        if old == new {
            return Ok(());
        }

        if old.is_builtin() {
            // 先检查再修改，保证失败时状态不变
            if let Some(dep) = deps
                .iter()
                .find(|dep| self.ref_counts.get(*dep).copied().unwrap_or(0) == 0)
            {
                return Err(CoreError::InvalidOperation(format!(
                    "共享依赖 '{}' 的引用计数下溢",
                    dep
                )));
            }
            for dep in deps {
                if let Some(count) = self.ref_counts.get_mut(dep) {
                    *count -= 1;
                }
            }
        }

        if new.is_builtin() {
            for dep in deps {
                *self.ref_counts.entry(dep.clone()).or_insert(0) += 1;
            }
        }

        self.module_types.insert(module.to_string(), new);
        tracing::debug!("模块 '{}' 加载方式变更: {} -> {}", module, old, new);
        Ok(())
    }

    /// 解析结果：共享依赖 -> 加载方式
    pub fn resolved(&self) -> BTreeMap<String, LoadType> {
        self.ref_counts
            .iter()
            .map(|(dep, count)| (dep.clone(), Self::type_for(*count)))
            .collect()
    }

    /// 单个共享依赖的加载方式
    pub fn resolved_type(&self, dependency: &str) -> Option<LoadType> {
        self.ref_counts.get(dependency).map(|c| Self::type_for(*c))
    }

    pub fn ref_count(&self, dependency: &str) -> Option<usize> {
        self.ref_counts.get(dependency).copied()
    }

    /// 模块当前的加载方式
    pub fn module_load_type(&self, module: &str) -> Option<LoadType> {
        self.module_types.get(module).copied()
    }

    fn type_for(count: usize) -> LoadType {
        if count > 0 {
            LoadType::BuiltIn
        } else {
            LoadType::Remote
        }
    }
}
