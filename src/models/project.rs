//! # 项目数据模型
//!
//! 定义了项目（Project）及其创建、更新、列表展示用的辅助结构体，
//! 对应前端 TypeScript 中的 `Project`、`ProjectDraft`、`ProjectPatch` 接口。
//!
//! 所有结构体均使用 camelCase 序列化，既用于 Tauri IPC 传输，
//! 也用于 `projects.json` 数据文件的读写。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 新项目的默认变量集合
pub const DEFAULT_VARIABLES: [&str; 3] = ["role", "task", "context"];

/// 新项目的默认模板，引用全部默认变量
pub const DEFAULT_TEMPLATE: &str = "你是一名{role}。\n\n请完成以下任务：{task}\n\n背景信息：{context}";

/// 表单数据：变量名 → 用户填写的值
///
/// 使用 `BTreeMap` 保证序列化结果稳定（键有序），便于数据文件对比。
pub type FormData = BTreeMap<String, String>;

/// 结果模式
///
/// 决定提交表单后只展示替换后的提示词，还是额外调用生成服务得到 AI 回复。
///
/// 对应前端 TypeScript 类型：`'PROMPT' | 'AI_RESPONSE'`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseMode {
    /// 仅输出替换后的提示词文本
    #[default]
    Prompt,
    /// 以替换后的文本为输入，流式生成 AI 回复
    AiResponse,
}

/// 项目数据结构
///
/// 一个项目包含一份模板、模板中可用的变量列表以及用户填写的表单。
///
/// 对应前端 TypeScript 接口：
/// ```typescript
/// interface Project {
///   id: string;
///   name: string;
///   description: string;
///   availableVariables: string[];
///   template: string;
///   formData: Record<string, string>;
///   generatedPrompt: string;
///   responseMode: 'PROMPT' | 'AI_RESPONSE';
///   aiResponse: string;
///   createdAt: string;
///   updatedAt: string;
/// }
/// ```
///
/// ## 不变量
/// - `available_variables` 中没有重复的变量名
/// - 删除或重命名变量完成后，`form_data` 中不存在 `available_variables` 之外的键
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// 唯一标识符（UUID v4），由持久化层在创建时分配
    pub id: String,

    /// 项目名称
    pub name: String,

    /// 项目描述
    #[serde(default)]
    pub description: String,

    /// 已声明的变量名列表：顺序即声明顺序，也是替换顺序
    pub available_variables: Vec<String>,

    /// 模板文本，包含零个或多个 `{name}` 占位符
    pub template: String,

    /// 表单数据：变量名 → 值
    #[serde(default)]
    pub form_data: FormData,

    /// 最近一次提交表单后生成的提示词，未生成时为空
    #[serde(default)]
    pub generated_prompt: String,

    /// 结果模式
    #[serde(default)]
    pub response_mode: ResponseMode,

    /// 流式生成累积的 AI 回复，未开始生成时为空
    #[serde(default)]
    pub ai_response: String,

    /// 创建时间（UTC）
    pub created_at: DateTime<Utc>,

    /// 最后一次持久化修改的时间（UTC）
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// 生成列表展示用的摘要
    pub fn summary(&self) -> ProjectSummary {
        ProjectSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            variable_count: self.available_variables.len(),
            updated_at: self.updated_at,
        }
    }

    /// 判断变量是否已声明
    pub fn has_variable(&self, name: &str) -> bool {
        self.available_variables.iter().any(|v| v == name)
    }

    /// 模板是否为空（仅包含空白字符也视为空）
    pub fn template_is_blank(&self) -> bool {
        self.template.trim().is_empty()
    }
}

/// 创建项目时提交的字段
///
/// `available_variables` 和 `template` 缺省时使用默认变量集合和默认模板。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_variables: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_mode: Option<ResponseMode>,
}

impl ProjectDraft {
    /// 以名称和描述构造草稿，其余字段使用默认值
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    /// 将草稿展开为完整项目
    ///
    /// 变量列表会按首次出现去重；表单为每个变量预置空字符串。
    /// ID 和时间戳由持久化层传入。
    pub fn into_project(self, id: String, now: DateTime<Utc>) -> Project {
        let declared = self
            .available_variables
            .unwrap_or_else(|| DEFAULT_VARIABLES.iter().map(|v| v.to_string()).collect());

        let mut available_variables: Vec<String> = Vec::with_capacity(declared.len());
        for name in declared {
            let name = name.trim().to_string();
            if !name.is_empty() && !available_variables.contains(&name) {
                available_variables.push(name);
            }
        }

        let form_data = available_variables
            .iter()
            .map(|v| (v.clone(), String::new()))
            .collect();

        Project {
            id,
            name: self.name.trim().to_string(),
            description: self.description,
            available_variables,
            template: self
                .template
                .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
            form_data,
            generated_prompt: String::new(),
            response_mode: self.response_mode.unwrap_or_default(),
            ai_response: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// 部分更新字段
///
/// 每个字段都是可选的，只有 `Some` 的字段会被写入。
/// 对应持久化协作方的 `updateProject(id, partialFields)`。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_variables: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_data: Option<FormData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_mode: Option<ResponseMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_response: Option<String>,
}

impl ProjectPatch {
    /// 仅更新模板文本（自动保存使用）
    pub fn template(template: impl Into<String>) -> Self {
        Self {
            template: Some(template.into()),
            ..Self::default()
        }
    }

    /// 变量增删改后需要一起落盘的三个字段
    pub fn variables_of(project: &Project) -> Self {
        Self {
            available_variables: Some(project.available_variables.clone()),
            template: Some(project.template.clone()),
            form_data: Some(project.form_data.clone()),
            ..Self::default()
        }
    }

    /// 将补丁应用到项目上（不修改时间戳，时间戳由持久化层负责）
    pub fn apply_to(self, project: &mut Project) {
        if let Some(name) = self.name {
            project.name = name;
        }
        if let Some(description) = self.description {
            project.description = description;
        }
        if let Some(vars) = self.available_variables {
            project.available_variables = vars;
        }
        if let Some(template) = self.template {
            project.template = template;
        }
        if let Some(form_data) = self.form_data {
            project.form_data = form_data;
        }
        if let Some(generated) = self.generated_prompt {
            project.generated_prompt = generated;
        }
        if let Some(mode) = self.response_mode {
            project.response_mode = mode;
        }
        if let Some(ai_response) = self.ai_response {
            project.ai_response = ai_response;
        }
    }
}

/// 项目列表条目
///
/// 项目列表只需要名称、描述等少量字段，避免把每个项目的模板和表单都传给前端。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub variable_count: usize,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_defaults() {
        let project = ProjectDraft::new("周报", "").into_project("p1".into(), Utc::now());

        assert_eq!(project.available_variables, vec!["role", "task", "context"]);
        assert_eq!(project.template, DEFAULT_TEMPLATE);
        assert_eq!(project.form_data.len(), 3);
        assert!(project.form_data.values().all(|v| v.is_empty()));
        assert_eq!(project.response_mode, ResponseMode::Prompt);
        assert_eq!(project.created_at, project.updated_at);
    }

    #[test]
    fn test_draft_dedups_variables() {
        let draft = ProjectDraft {
            name: "  去重  ".into(),
            available_variables: Some(vec!["a".into(), " a ".into(), "".into(), "b".into()]),
            template: Some("{a}{b}".into()),
            ..ProjectDraft::default()
        };
        let project = draft.into_project("p1".into(), Utc::now());

        assert_eq!(project.name, "去重");
        assert_eq!(project.available_variables, vec!["a", "b"]);
    }

    #[test]
    fn test_patch_applies_only_present_fields() {
        let mut project = ProjectDraft::new("原名", "描述").into_project("p1".into(), Utc::now());
        let patch = ProjectPatch::template("新模板");
        patch.apply_to(&mut project);

        assert_eq!(project.template, "新模板");
        assert_eq!(project.name, "原名");
        assert_eq!(project.description, "描述");
    }

    #[test]
    fn test_project_serializes_camel_case() {
        let mut project = ProjectDraft::new("序列化", "").into_project("p1".into(), Utc::now());
        project.response_mode = ResponseMode::AiResponse;
        let json = serde_json::to_value(&project).unwrap();

        assert!(json.get("availableVariables").is_some());
        assert!(json.get("generatedPrompt").is_some());
        assert_eq!(json["responseMode"], "AI_RESPONSE");
    }
}
