//! 核心宏定义
//!
//! 配置结构体与状态对象的默认值样板代码统一放在这里

/// 为结构体实现Default trait的宏
///
/// 使用示例:
/// ```rust
/// use scene_bridge::impl_default;
///
/// struct Viewport {
///     width: u32,
///     height: u32,
/// }
///
/// impl_default!(Viewport {
///     width: 1080,
///     height: 1920,
/// });
///
/// assert_eq!(Viewport::default().width, 1080);
/// ```
#[macro_export]
macro_rules! impl_default {
    ($struct_name:ident {
        $($field:ident: $value:expr),* $(,)?
    }) => {
        impl Default for $struct_name {
            fn default() -> Self {
                Self {
                    $($field: $value),*
                }
            }
        }
    };
}

/// 同时实现Default和new()的宏
///
/// `new()` 直接委托给 `Default`，两者永远一致。
#[macro_export]
macro_rules! impl_default_and_new {
    ($struct_name:ident {
        $($field:ident: $value:expr),* $(,)?
    }) => {
        impl Default for $struct_name {
            fn default() -> Self {
                Self {
                    $($field: $value),*
                }
            }
        }

        impl $struct_name {
            pub fn new() -> Self {
                Self::default()
            }
        }
    };
}
