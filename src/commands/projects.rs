//! # 项目 Tauri Commands
//!
//! - `list_projects` / `search_projects` - 项目摘要列表（经由 TTL 缓存）
//! - `create_project` / `open_project` / `close_project` - 切换当前项目
//! - `delete_project` - 删除项目（仅 admin）
//! - `update_project_meta` - 编辑浮层中修改名称和描述

use tauri::State;

use super::AppState;
use crate::error::WorkflowError;
use crate::models::project::{ProjectDraft, ProjectSummary};
use crate::models::workflow::WorkflowView;

/// 获取项目摘要列表，按最近修改时间倒序
///
/// 缓存有效（30 秒内且期间没有写操作）时直接返回缓存数据。
#[tauri::command]
pub async fn list_projects(state: State<'_, AppState>) -> Result<Vec<ProjectSummary>, WorkflowError> {
    state.studio.list_projects().await
}

/// 按名称和描述搜索项目（不区分大小写）
#[tauri::command]
pub async fn search_projects(
    query: String,
    state: State<'_, AppState>,
) -> Result<Vec<ProjectSummary>, WorkflowError> {
    state.studio.search_projects(&query).await
}

/// 创建项目并立即打开
///
/// 未指定变量和模板时使用默认的 `role` / `task` / `context` 三个变量和默认模板。
#[tauri::command]
pub async fn create_project(
    draft: ProjectDraft,
    state: State<'_, AppState>,
) -> Result<WorkflowView, WorkflowError> {
    state.studio.create_project(draft).await
}

/// 打开项目
///
/// 旧项目未保存的模板编辑会先写回旧项目，进行中的生成被取消。
#[tauri::command]
pub async fn open_project(
    id: String,
    state: State<'_, AppState>,
) -> Result<WorkflowView, WorkflowError> {
    state.studio.open_project(&id).await
}

#[tauri::command]
pub async fn close_project(state: State<'_, AppState>) -> Result<WorkflowView, WorkflowError> {
    Ok(state.studio.close_project().await)
}

#[tauri::command]
pub async fn delete_project(
    id: String,
    state: State<'_, AppState>,
) -> Result<WorkflowView, WorkflowError> {
    state.studio.delete_project(&id).await
}

#[tauri::command]
pub async fn update_project_meta(
    name: String,
    description: String,
    state: State<'_, AppState>,
) -> Result<WorkflowView, WorkflowError> {
    state.studio.update_project_meta(&name, &description).await
}
