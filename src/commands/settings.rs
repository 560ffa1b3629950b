//! # 设置 Tauri Commands
//!
//! - `get_app_data_path` - 获取 `~/.mo/PromptStudio/` 路径
//! - `read_config` / `save_config` - 读写 `app-config.json`
//!
//! 保存配置时角色立即生效；自动保存静默期和生成服务配置在下次启动时生效。

use tauri::State;

use super::AppState;
use crate::error::WorkflowError;
use crate::models::settings::AppConfig;
use crate::services::config;

#[tauri::command]
pub async fn get_app_data_path(state: State<'_, AppState>) -> Result<String, WorkflowError> {
    Ok(state.data_root.to_string_lossy().to_string())
}

/// 读取应用配置，文件不存在或损坏时返回默认配置
#[tauri::command]
pub async fn read_config(state: State<'_, AppState>) -> Result<AppConfig, WorkflowError> {
    Ok(config::load_config(&state.data_root).await)
}

/// 保存应用配置
///
/// 通过 `file_guard` 写入（含路径验证 + 备份 + 原子替换）。
#[tauri::command]
pub async fn save_config(
    config: AppConfig,
    state: State<'_, AppState>,
) -> Result<(), WorkflowError> {
    config::save_config(&state.data_root, &config)
        .await
        .map_err(WorkflowError::persistence)?;
    state.studio.set_role(config.role);
    Ok(())
}
