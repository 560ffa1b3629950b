//! # 变量与模板 Tauri Commands
//!
//! 变量增删改会立即把变量列表、模板和表单一起落盘；
//! 模板编辑只更新本地状态，由自动保存在静默期结束后落盘。
//! 以上操作都要求 admin 角色。

use tauri::State;

use super::AppState;
use crate::error::WorkflowError;
use crate::models::workflow::WorkflowView;

#[tauri::command]
pub async fn add_variable(
    name: String,
    state: State<'_, AppState>,
) -> Result<WorkflowView, WorkflowError> {
    state.studio.add_variable(&name).await
}

/// 重命名变量
///
/// 模板中所有 `{old_name}` 替换为 `{new_name}`，表单值随之迁移。
/// 新名称为空、与旧名称相同或已经存在时返回 `Validation` 错误。
#[tauri::command]
pub async fn rename_variable(
    old_name: String,
    new_name: String,
    state: State<'_, AppState>,
) -> Result<WorkflowView, WorkflowError> {
    state.studio.rename_variable(&old_name, &new_name).await
}

/// 删除变量，模板中所有 `{name}` 被清空
#[tauri::command]
pub async fn delete_variable(
    name: String,
    state: State<'_, AppState>,
) -> Result<WorkflowView, WorkflowError> {
    state.studio.delete_variable(&name).await
}

#[tauri::command]
pub async fn edit_template(
    template: String,
    state: State<'_, AppState>,
) -> Result<WorkflowView, WorkflowError> {
    state.studio.edit_template(&template)
}
