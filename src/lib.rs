//! # Prompt Studio - 应用核心初始化模块
//!
//! 提示词模板编辑器：用户在模板中声明 `{变量}` 占位符，通过表单填写变量值，
//! 得到替换后的提示词，或把提示词交给生成服务流式返回 AI 回复。
//!
//! ## 架构说明
//! 模板引擎、工作流状态机和持久化层不依赖 WebView，可以独立构建和测试；
//! Tauri 桌面壳（`commands/` 和 `run()`）只在启用 `desktop` feature 时编译。
//! 通过将核心逻辑放在 `lib.rs` 而非 `main.rs` 中，
//! Tauri 可以在桌面端（`main.rs`）和移动端入口之间共享此初始化代码。
//!
//! ## 模块结构
//! - `commands/` - Tauri command 处理函数（IPC 接口层）
//! - `models/` - 数据模型（对应前端 TypeScript 类型）
//! - `services/` - 核心业务逻辑（占位符、变量注册表、自动保存、流式生成、工作流）
//! - `error` - 工作流错误类型
//! - `utils/` - 通用工具函数

#[cfg(feature = "desktop")]
mod commands;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use error::{WorkflowError, WorkflowResult};
pub use services::studio::Studio;

#[cfg(feature = "desktop")]
use std::sync::Arc;

#[cfg(feature = "desktop")]
use tauri::{Emitter, Manager};

#[cfg(feature = "desktop")]
use crate::models::workflow::StreamUpdate;

/// 把流式事件和自动保存状态转发给前端
///
/// - 流式事件先交给工作流状态机，只有被接受的事件才以 `stream-update` 推送
/// - 自动保存状态每次变化以 `autosave-status` 推送
#[cfg(feature = "desktop")]
fn spawn_event_pumps(
    app: tauri::AppHandle,
    studio: Arc<Studio>,
    mut updates: tokio::sync::mpsc::UnboundedReceiver<StreamUpdate>,
) {
    let stream_app = app.clone();
    let stream_studio = Arc::clone(&studio);
    tauri::async_runtime::spawn(async move {
        while let Some(update) = updates.recv().await {
            let payload = update.clone();
            if stream_studio.apply_stream_update(update).await.is_some() {
                if let Err(e) = stream_app.emit("stream-update", &payload) {
                    log::warn!("推送流式事件失败: {}", e);
                }
            }
        }
    });

    let mut status = studio.autosave().subscribe();
    tauri::async_runtime::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            if let Err(e) = app.emit("autosave-status", &current) {
                log::warn!("推送自动保存状态失败: {}", e);
            }
        }
    });
}

// `#[cfg_attr(mobile, tauri::mobile_entry_point)]`：条件编译属性
// 当目标平台为移动端（Android/iOS）时，此属性将 `run()` 函数标记为
// Tauri 移动端入口点。在桌面端编译时，此属性不生效，`run()` 由 `main.rs` 直接调用。
#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
/// Tauri 应用启动函数
///
/// 1. 注册所有自定义 Tauri commands
/// 2. 在 `setup` 钩子中按需注册调试专用插件（日志）
/// 3. 读取应用配置，创建项目存储、生成后端和 `Studio` 协调器
/// 4. 启动事件转发任务
/// 5. 生成应用上下文并启动主事件循环
///
/// # Panics
/// 如果 Tauri 应用启动失败（例如配置文件缺失或窗口创建失败），
/// 将通过 `.expect()` 触发 panic 并输出错误信息。
pub fn run() {
    use crate::commands::AppState;
    use crate::services::generation::HttpGenerationBackend;
    use crate::services::store::JsonFileStore;
    use crate::services::config;
    use crate::utils::path;

    tauri::Builder::default()
        .invoke_handler(tauri::generate_handler![
            // 项目
            commands::projects::list_projects,
            commands::projects::search_projects,
            commands::projects::create_project,
            commands::projects::open_project,
            commands::projects::close_project,
            commands::projects::delete_project,
            commands::projects::update_project_meta,
            // 变量与模板
            commands::variables::add_variable,
            commands::variables::rename_variable,
            commands::variables::delete_variable,
            commands::variables::edit_template,
            // 工作流
            commands::workflow::get_view,
            commands::workflow::set_field,
            commands::workflow::set_response_mode,
            commands::workflow::select_tab,
            commands::workflow::begin_overlay,
            commands::workflow::end_overlay,
            commands::workflow::submit_form,
            commands::workflow::regenerate,
            commands::workflow::cancel_generation,
            commands::workflow::reset_workflow,
            // 设置
            commands::settings::get_app_data_path,
            commands::settings::read_config,
            commands::settings::save_config,
        ])
        .setup(|app| {
            // 仅在开发调试模式下启用日志插件
            if cfg!(debug_assertions) {
                app.handle().plugin(
                    tauri_plugin_log::Builder::default()
                        .level(log::LevelFilter::Info)
                        .build(),
                )?;
            }

            let data_root = path::get_app_data_path()?;
            let app_config = tauri::async_runtime::block_on(config::load_config(&data_root));
            log::info!("数据目录: {}", data_root.display());

            let store = Arc::new(JsonFileStore::new(data_root.clone()));
            let backend = Arc::new(HttpGenerationBackend::new(app_config.generation.clone()));
            let (studio, updates) = Studio::new(store, backend, &app_config);
            let studio = Arc::new(studio);

            spawn_event_pumps(app.handle().clone(), Arc::clone(&studio), updates);
            app.manage(AppState { studio, data_root });
            Ok(())
        })
        // 编译时读取 `tauri.conf.json`，生成包含应用名称、窗口配置等信息的上下文对象
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
