//! # 工作流 Tauri Commands
//!
//! 表单编辑、标签页与浮层切换、提交、重新生成和重置。
//! 流式生成的分块不通过返回值传递，而是以 `stream-update` 事件推送给前端。

use tauri::State;

use super::AppState;
use crate::error::WorkflowError;
use crate::models::project::ResponseMode;
use crate::models::workflow::{Overlay, Tab, WorkflowView};

/// 获取当前工作流快照
#[tauri::command]
pub async fn get_view(state: State<'_, AppState>) -> Result<WorkflowView, WorkflowError> {
    Ok(state.studio.view())
}

#[tauri::command]
pub async fn set_field(
    name: String,
    value: String,
    state: State<'_, AppState>,
) -> Result<WorkflowView, WorkflowError> {
    state.studio.set_field(&name, &value)
}

#[tauri::command]
pub async fn set_response_mode(
    mode: ResponseMode,
    state: State<'_, AppState>,
) -> Result<WorkflowView, WorkflowError> {
    state.studio.set_response_mode(mode).await
}

#[tauri::command]
pub async fn select_tab(tab: Tab, state: State<'_, AppState>) -> Result<WorkflowView, WorkflowError> {
    state.studio.select_tab(tab)
}

#[tauri::command]
pub async fn begin_overlay(
    overlay: Overlay,
    state: State<'_, AppState>,
) -> Result<WorkflowView, WorkflowError> {
    state.studio.begin_overlay(overlay)
}

#[tauri::command]
pub async fn end_overlay(state: State<'_, AppState>) -> Result<WorkflowView, WorkflowError> {
    Ok(state.studio.end_overlay())
}

/// 提交表单
///
/// 校验必填字段后渲染模板并切换到结果页；
/// 结果模式为 `AI_RESPONSE` 时同时启动流式生成。
#[tauri::command]
pub async fn submit_form(state: State<'_, AppState>) -> Result<WorkflowView, WorkflowError> {
    state.studio.submit().await?;
    Ok(state.studio.view())
}

#[tauri::command]
pub async fn regenerate(state: State<'_, AppState>) -> Result<WorkflowView, WorkflowError> {
    state.studio.regenerate()?;
    Ok(state.studio.view())
}

#[tauri::command]
pub async fn cancel_generation(state: State<'_, AppState>) -> Result<WorkflowView, WorkflowError> {
    state.studio.cancel_generation().await
}

#[tauri::command]
pub async fn reset_workflow(state: State<'_, AppState>) -> Result<WorkflowView, WorkflowError> {
    state.studio.reset().await
}
