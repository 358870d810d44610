//! 平台配置集成测试
//!
//! 测试从 YAML / JSON 文件加载配置以及校验

use minigame_core::{CoreError, LoadType, PlatformConfig};
use tempfile::TempDir;

/// 测试完整的 YAML 配置加载
#[tokio::test]
async fn test_load_yaml_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("platform.yaml");
    tokio::fs::write(
        &path,
        r#"
platform: android
logging:
  level: debug
  json_format: true
cache:
  cache_dir: /tmp/minigame/content
  max_age_days: 7
modules:
  - name: Puzzle
    url: https://cdn.example.com/games
    version: 1.2.0
    load_type: builtin
    shared_dependencies:
      - https://cdn.example.com/shared/ui.json
      - https://cdn.example.com/shared/audio.json
  - name: Racer
    url: https://cdn.example.com/games
    version: 0.3.1
    render_profile: high
    shared_dependencies:
      - https://cdn.example.com/shared/ui.json
"#,
    )
    .await
    .unwrap();

    let config = PlatformConfig::from_file(&path).await.unwrap();
    assert_eq!(config.config_path.as_deref(), Some(path.as_path()));
    assert_eq!(config.platform, "android");
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json_format);

    // 未设置的字段使用默认值
    assert_eq!(config.cache.max_age_days, 7);
    assert_eq!(config.cache.max_total_bytes, 5 * 1024 * 1024 * 1024);
    assert_eq!(config.cache.request_timeout_secs, 30);

    assert_eq!(config.modules.len(), 2);
    let puzzle = &config.modules[0];
    assert_eq!(puzzle.name(), "Puzzle");
    assert_eq!(puzzle.load_type, LoadType::BuiltIn);
    assert_eq!(puzzle.descriptor.shared_dependencies.len(), 2);

    let racer = &config.modules[1];
    assert_eq!(racer.load_type, LoadType::Remote);
    assert_eq!(racer.descriptor.render_profile.as_deref(), Some("high"));

    assert!(config.validate().is_ok());
}

/// 测试 JSON 配置加载
#[tokio::test]
async fn test_load_json_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("platform.json");
    let content = serde_json::json!({
        "platform": "ios",
        "modules": [
            { "name": "Puzzle", "url": "https://cdn.example.com", "version": "1.0.0", "load_type": "built_in" }
        ]
    });
    tokio::fs::write(&path, content.to_string()).await.unwrap();

    let config = PlatformConfig::from_file(&path).await.unwrap();
    assert_eq!(config.platform, "ios");
    assert_eq!(config.modules[0].load_type, LoadType::BuiltIn);
    assert!(config.modules[0].descriptor.shared_dependencies.is_empty());
}

/// 测试文件不存在
#[tokio::test]
async fn test_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    let result = PlatformConfig::from_file(temp_dir.path().join("missing.yaml")).await;
    assert!(matches!(result, Err(CoreError::ConfigLoadFailed(_))));
}

/// 测试格式错误
#[tokio::test]
async fn test_malformed_yaml() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.yaml");
    tokio::fs::write(&path, "modules: [ { name: Puzzle").await.unwrap();

    let result = PlatformConfig::from_file(&path).await;
    assert!(matches!(result, Err(CoreError::Yaml(_))));
}

/// 测试校验列出全部问题
#[tokio::test]
async fn test_validation_reports_every_problem() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("invalid.yaml");
    tokio::fs::write(
        &path,
        r#"
modules:
  - name: Puzzle
    url: https://cdn.example.com
    version: not-a-version
  - name: Puzzle
    url: ""
    version: 1.0.0
"#,
    )
    .await
    .unwrap();

    let config = PlatformConfig::from_file(&path).await.unwrap();
    let problems = config.problems();
    assert_eq!(problems.len(), 3, "{:?}", problems);

    match config.validate() {
        Err(CoreError::InvalidConfigValue { key, reason }) => {
            assert_eq!(key, "modules");
            assert!(reason.contains("not-a-version"));
            assert!(reason.contains("名称重复"));
            assert!(reason.contains("url 为空"));
        }
        other => panic!("预期 InvalidConfigValue，实际 {:?}", other),
    }
}
