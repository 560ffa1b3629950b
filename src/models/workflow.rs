//! # 工作流视图数据模型
//!
//! 定义了工作流状态机对外暴露的数据结构：标签页、浮层、生成状态、
//! 流式更新事件以及给前端渲染用的 `WorkflowView` 快照。
//!
//! `WorkflowView` 是前端唯一的数据源，前端不需要自行推导哪些标签页可达、
//! 哪些字段必填，所有判断都在 Rust 端完成。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::project::{FormData, Project};
use crate::models::settings::Role;

/// 标签页
///
/// 正常流程为 `form → template → result`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tab {
    Form,
    Template,
    Result,
}

/// 浮层：打开时挂起标签页视图
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Overlay {
    /// 正在创建新项目
    Creating,
    /// 正在编辑项目名称/描述
    Editing,
}

/// 生成状态
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum GenerationStatus {
    /// 没有进行中的生成
    #[default]
    Idle,
    /// 流式生成进行中
    Streaming { run: u64 },
    /// 最近一次生成正常结束
    Completed { run: u64 },
    /// 最近一次生成失败
    Failed { run: u64, message: String },
}

impl GenerationStatus {
    pub fn is_streaming(&self) -> bool {
        matches!(self, GenerationStatus::Streaming { .. })
    }
}

/// 流式更新事件的内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamUpdateKind {
    /// 收到一个文本分块
    Chunk { text: String },
    /// 流正常结束
    Completed,
    /// 传输或解析失败
    Failed { message: String },
}

/// 流式更新事件
///
/// 由 StreamAggregator 的回调产生，携带发起时绑定的项目 ID 和运行序号，
/// 工作流状态机据此丢弃过期事件。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamUpdate {
    pub project_id: String,
    pub run: u64,
    #[serde(flatten)]
    pub kind: StreamUpdateKind,
}

/// 前端渲染用的工作流快照
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowView {
    /// 当前角色
    pub role: Role,
    /// 当前打开的项目
    pub project: Option<Project>,
    /// 当前标签页
    pub tab: Tab,
    /// 当前角色和模板状态下可以切换到的标签页
    pub reachable_tabs: Vec<Tab>,
    /// 当前浮层
    pub overlay: Option<Overlay>,
    /// 本地表单缓冲区
    pub form: FormData,
    /// 模板中出现的、必须填写的字段
    pub required_fields: Vec<String>,
    /// 字段级错误信息：字段名 → 提示文本
    pub field_errors: BTreeMap<String, String>,
    /// 模板中出现但尚未声明的占位符
    pub undeclared_placeholders: Vec<String>,
    /// 生成状态
    pub generation: GenerationStatus,
}
