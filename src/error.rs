//! # 工作流错误类型
//!
//! 模板引擎和工作流层的所有错误都是可恢复的：
//! - `Validation` - 表单缺少必填字段、变量名为空或重复；在本地提示，不推进状态
//! - `PermissionDenied` - 只读角色尝试执行编辑或删除操作
//! - `Persistence` - 自动保存或增删改请求失败；本地编辑保留，用户可重试
//! - `Stream` - 生成流传输失败；已生成的提示词不受影响
//! - `NoActiveProject` - 需要打开项目的操作在没有打开项目时被调用
//!
//! 错误通过 `Serialize` 以 `{ kind, ... }` 的形式传给前端，
//! 前端据此决定显示为字段级提示还是全局通知。

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WorkflowError {
    #[error("{message}")]
    Validation { field: String, message: String },

    #[error("当前角色无权执行该操作: {action}")]
    PermissionDenied { action: String },

    #[error("保存失败: {message}")]
    Persistence { message: String },

    #[error("生成失败: {message}")]
    Stream { message: String },

    #[error("当前没有打开的项目")]
    NoActiveProject,
}

impl WorkflowError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    pub fn denied(action: impl Into<String>) -> Self {
        Self::PermissionDenied {
            action: action.into(),
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
