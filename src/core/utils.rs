//! 核心工具函数

/// 获取当前Unix时间戳（毫秒）
///
/// 待决操作 ID 与事件时间戳都基于它。
///
/// ```rust
/// use scene_bridge::core::utils::current_timestamp_ms;
///
/// let id = format!("op_{}", current_timestamp_ms());
/// assert!(id.starts_with("op_"));
/// ```
pub fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// 获取当前Unix时间戳（毫秒，浮点）
///
/// 事件信封里的 `timestamp` 字段使用这个格式，脚本侧可以直接当作 `Date.now()` 比较。
pub fn current_timestamp_f64() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
        * 1000.0
}

/// 恢复被毒化的互斥锁
///
/// 所有临界区都保持数据结构一致，panic 之后仍可继续使用。
pub fn lock_or_recover<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
