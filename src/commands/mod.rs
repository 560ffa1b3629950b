//! # Tauri Command 处理模块
//!
//! 本模块包含所有注册到 Tauri 的 command 处理函数。
//! 每个子模块对应一个功能域：
//! - `projects` - 项目列表、创建、打开、删除和元信息修改
//! - `variables` - 变量增删改和模板编辑
//! - `workflow` - 表单、标签页、浮层、提交与生成
//! - `settings` - 应用配置读写
//!
//! 所有 command 都返回 `WorkflowError`，前端按 `kind` 字段区分字段级提示和全局通知。

use std::path::PathBuf;
use std::sync::Arc;

use crate::services::studio::Studio;

pub mod projects;
pub mod settings;
pub mod variables;
pub mod workflow;

/// Tauri managed state
pub struct AppState {
    pub studio: Arc<Studio>,
    /// 数据目录（`~/.mo/PromptStudio/`）
    pub data_root: PathBuf,
}
