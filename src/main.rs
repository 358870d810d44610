//! MiniGame Core 命令行入口
//!
//! 小游戏宿主内核的运维工具：检查配置、查看模块与加载方式解析结果、维护内容缓存。
//!
//! # 命令概览
//!
//! - `version` - 显示版本信息
//! - `check-config` - 验证配置文件
//! - `list-modules` - 列出已配置的模块
//! - `resolve` - 显示共享依赖的加载方式
//! - `fetch` - 通过内容缓存下载一个 URL
//! - `cache evict` / `cache clear` - 淘汰或清空内容缓存
//!
//! # 使用示例
//!
//! ```bash
//! # 检查配置文件
//! minigame-core -c platform.yaml check-config
//!
//! # 按 7 天 / 1 GiB 淘汰缓存
//! minigame-core cache evict --max-age-days 7 --max-bytes 1073741824
//! ```

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::info;

use minigame_core::{
    CoreError, ContentCache, EvictionPolicy, LoadTypeResolver, LogGuard, Logger, LoggerConfig,
    ModuleRegistry, PlatformConfig,
};

/// MiniGame Core - 小游戏宿主内核
#[derive(Parser)]
#[command(name = "minigame-core")]
#[command(version, about = "按需下载并运行小游戏模块的宿主内核", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "platform.yaml", global = true)]
    config: PathBuf,

    /// 日志级别 (trace, debug, info, warn, error)，覆盖配置文件
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// 子命令
    #[command(subcommand)]
    command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
enum Commands {
    /// 查看版本信息
    Version,

    /// 验证配置文件
    ///
    /// 检查配置文件是否有效，并显示解析后的配置内容。
    CheckConfig,

    /// 列出已配置的模块
    ListModules,

    /// 显示共享依赖的加载方式
    ///
    /// 根据每个模块的内置/远程设置，显示每个共享依赖的解析结果。
    Resolve,

    /// 通过内容缓存下载一个 URL
    Fetch {
        /// 目标 URL
        url: String,
    },

    /// 维护内容缓存
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Subcommand)]
enum CacheCommand {
    /// 淘汰过期条目，再按最旧优先淘汰到容量以内
    Evict {
        /// 最长保留天数（默认取配置）
        #[arg(long)]
        max_age_days: Option<u64>,

        /// 总容量上限，字节（默认取配置）
        #[arg(long)]
        max_bytes: Option<u64>,
    },

    /// 清空内容缓存
    Clear,
}

/// 加载配置文件；文件不存在时使用默认配置
async fn load_config(path: &Path) -> Result<PlatformConfig, CoreError> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        PlatformConfig::from_file(path).await
    } else {
        Ok(PlatformConfig::default())
    }
}

/// 初始化日志系统
fn init_logging(config: &PlatformConfig, level: Option<&str>) -> Result<LogGuard, CoreError> {
    let mut logger_config = LoggerConfig::from_log_config(&config.logging);
    if let Some(level) = level {
        logger_config.level = level.to_string();
    }
    Logger::init(logger_config)
}

/// 打印版本信息
fn print_version() {
    println!();
    println!("MiniGame Core - 小游戏宿主内核");
    println!("═══════════════════════════════════════");
    println!("  版本:             {}", minigame_core::VERSION);
    println!();
    println!("构建信息:");
    println!("  架构:             {}", std::env::consts::ARCH);
    println!("  操作系统:         {}", std::env::consts::OS);
    println!("═══════════════════════════════════════");
    println!();
}

/// 检查配置文件
async fn check_config(path: &Path) -> Result<(), CoreError> {
    println!("检查配置文件: {}", path.display());
    println!();

    let config = match PlatformConfig::from_file(path).await {
        Ok(config) => config,
        Err(e) => {
            println!("❌ 配置文件无法加载: {}", e);
            return Err(e);
        }
    };

    let problems = config.problems();
    if !problems.is_empty() {
        println!("❌ 配置文件无效:");
        for problem in &problems {
            println!("    - {}", problem);
        }
        return config.validate();
    }

    println!("✅ 配置文件有效！");
    println!();
    println!("配置内容:");
    println!("────────────────────────────────────────");
    println!("  平台:             {}", config.platform);
    println!();
    println!("  [日志配置]");
    println!("    日志级别:       {}", config.logging.level);
    println!("    文件输出:       {}", if config.logging.file_output { "是" } else { "否" });
    println!("    JSON 格式:      {}", if config.logging.json_format { "是" } else { "否" });
    println!();
    println!("  [缓存配置]");
    println!("    缓存目录:       {}", config.cache.cache_dir.display());
    println!("    内置目录:       {}", config.cache.builtin_dir.display());
    println!("    最长保留:       {} 天", config.cache.max_age_days);
    println!("    容量上限:       {} 字节", config.cache.max_total_bytes);
    println!("    请求超时:       {} 秒", config.cache.request_timeout_secs);
    println!();
    println!("  [模块]            {} 个", config.modules.len());
    println!("────────────────────────────────────────");
    Ok(())
}

/// 列出已配置的模块
fn list_modules(config: &PlatformConfig) -> Result<(), CoreError> {
    let registry = ModuleRegistry::from_entries(config.modules.iter().cloned())?;

    println!();
    println!("已配置模块");
    println!("═══════════════════════════════════════");
    if registry.is_empty() {
        println!("  (无)");
    }
    for entry in registry.entries() {
        let descriptor = &entry.descriptor;
        println!("  {} v{} [{}]", descriptor.name, descriptor.version, entry.load_type);
        println!("    清单: {}", descriptor.manifest_url(&config.platform));
        for dependency in &descriptor.shared_dependencies {
            println!("    依赖: {}", dependency);
        }
    }
    println!("═══════════════════════════════════════");
    println!();
    Ok(())
}

/// 显示共享依赖的加载方式
fn show_resolution(config: &PlatformConfig) -> Result<(), CoreError> {
    let registry = ModuleRegistry::from_entries(config.modules.iter().cloned())?;
    let mut resolver = LoadTypeResolver::new(registry.dependencies());
    resolver.resolve(&registry.load_types())?;

    println!();
    println!("共享依赖加载方式");
    println!("═══════════════════════════════════════");
    for (dependency, load_type) in resolver.resolved() {
        let count = resolver.ref_count(&dependency).unwrap_or(0);
        println!("  [{}] {} (内置引用 {})", load_type, dependency, count);
    }
    println!("═══════════════════════════════════════");
    println!();
    Ok(())
}

/// 通过内容缓存下载一个 URL
async fn fetch(config: &PlatformConfig, url: &str) -> Result<(), CoreError> {
    let cache = ContentCache::from_config(&config.cache)?;
    let fetched = cache.fetch(url).await?;

    println!("  URL:      {}", url);
    println!("  来源:     {:?}", fetched.origin);
    println!("  大小:     {} 字节", fetched.bytes.len());
    println!("  路径:     {}", cache.layout().payload_path(url).display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        print_version();
        return Ok(());
    }
    if let Commands::CheckConfig = cli.command {
        check_config(&cli.config).await?;
        return Ok(());
    }

    let config = load_config(&cli.config).await?;
    let _guard = init_logging(&config, cli.log_level.as_deref())?;
    info!("已加载配置: {}", cli.config.display());

    match cli.command {
        Commands::Version | Commands::CheckConfig => {}

        Commands::ListModules => list_modules(&config)?,

        Commands::Resolve => show_resolution(&config)?,

        Commands::Fetch { url } => fetch(&config, &url).await?,

        Commands::Cache(CacheCommand::Evict {
            max_age_days,
            max_bytes,
        }) => {
            let defaults = EvictionPolicy::from(&config.cache);
            let policy = EvictionPolicy::new(
                max_age_days.unwrap_or(defaults.max_age_days),
                max_bytes.unwrap_or(defaults.max_total_bytes),
            );
            let cache = ContentCache::from_config(&config.cache)?;
            let report = cache.evict(policy).await;
            println!(
                "淘汰完成: 过期 {}，超容量 {}，失败 {}，剩余 {} 字节",
                report.expired, report.evicted_for_size, report.failed, report.remaining_bytes
            );
        }

        Commands::Cache(CacheCommand::Clear) => {
            let cache = ContentCache::from_config(&config.cache)?;
            cache.clear_all().await?;
            println!("内容缓存已清空: {}", config.cache.cache_dir.display());
        }
    }

    Ok(())
}
