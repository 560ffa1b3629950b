//! # Prompt Studio - Cargo 构建脚本
//!
//! 在 `cargo build` 编译主项目之前自动执行。
//! 仅在启用 `desktop` feature 时调用 Tauri 的构建前处理：
//! - 生成 Tauri 运行时所需的资源绑定代码
//! - 处理应用图标、权限清单等静态资源
//!
//! 未启用 `desktop` 时（例如只构建模板引擎库或运行单元测试），构建脚本不做任何事。

/// 构建脚本入口函数
///
/// 启用 `desktop` 时调用 `tauri_build::build()`，
/// 该函数会根据 `tauri.conf.json` 中的配置自动生成相应的编译产物。
fn main() {
    #[cfg(feature = "desktop")]
    tauri_build::build();
}
