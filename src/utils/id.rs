//! 十位 62 进制 ID 生成器
//!
//! 会话、隔离执行上下文和观察者订阅都使用这里生成的短 ID。
//! ID 格式：10 位 62 进制字符串（0-9, a-z, A-Z），可带一个 `前缀-`。

use rand::Rng;

/// 62 进制字符集
const BASE62_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// ID 长度
const ID_LENGTH: usize = 10;

/// 生成 10 位 62 进制 ID
///
/// # Example
///
/// ```
/// use minigame_core::utils::id::generate_id;
///
/// let id = generate_id();
/// assert_eq!(id.len(), 10);
/// ```
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LENGTH)
        .map(|_| BASE62_CHARS[rng.gen_range(0..BASE62_CHARS.len())] as char)
        .collect()
}

/// 生成带前缀的 ID，例如 `session-a1B2c3D4e5`
///
/// 前缀只用于日志中区分 ID 的来源，不参与唯一性。
pub fn generate_prefixed_id(prefix: &str) -> String {
    format!("{}-{}", prefix, generate_id())
}
