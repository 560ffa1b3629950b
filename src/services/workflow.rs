//! # 项目工作流状态机
//!
//! 持有"当前打开的项目"这一唯一的可变槽位，编排变量注册表、替换引擎和流式聚合器：
//! - 当前项目、当前标签页、创建/编辑浮层
//! - 本地表单缓冲区和字段级错误
//! - 进行中的流式会话及生成状态
//!
//! ## 标签页规则
//! - 模板为空（或只有空白）时 `result` 不可达；处于 `result` 时模板被清空则回到 `form`
//! - `viewer` 角色不可达 `template`；处于 `template` 时角色变为 `viewer` 则回到 `form`
//!
//! ## 异步结果隔离
//! 流式分块通过 `StreamUpdate` 事件回到状态机，每个事件都带着发起时的项目 ID 和运行序号，
//! 与当前会话不一致的事件直接丢弃。切换项目或重置时推进项目纪元，
//! 进行中的会话在下一次派发回调前自行失效。
//!
//! 本模块不做任何 I/O：需要落盘的变更以返回值交给调用方（`Studio`）。

use std::collections::BTreeMap;

use tokio::sync::mpsc;

use crate::error::{WorkflowError, WorkflowResult};
use crate::models::project::{FormData, Project, ResponseMode};
use crate::models::settings::Role;
use crate::models::workflow::{
    GenerationStatus, Overlay, StreamUpdate, StreamUpdateKind, Tab, WorkflowView,
};
use crate::services::placeholder;
use crate::services::registry;
use crate::services::stream::{ProjectEpoch, StreamAggregator, StreamHandle};
use crate::services::substitution;

/// 生成失败时追加到回复末尾的可见标记
const STREAM_ERROR_MARKER: &str = "[生成中断]";

/// 进行中的流式会话
struct StreamSession {
    project_id: String,
    run: u64,
    handle: StreamHandle,
}

/// 表单提交结果
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub project_id: String,
    pub rendered: String,
    pub form_data: FormData,
    pub response_mode: ResponseMode,
    /// 启动了流式生成时的运行序号
    pub run: Option<u64>,
}

/// 流式事件应用到状态机后的结果
#[derive(Debug, Clone, PartialEq)]
pub enum StreamApplied {
    /// 追加了一个分块
    Chunk,
    /// 生成正常结束，`ai_response` 为需要落盘的最终文本
    Finished {
        project_id: String,
        ai_response: String,
    },
    /// 生成失败，`ai_response` 已追加错误标记
    Failed {
        project_id: String,
        ai_response: String,
        error: WorkflowError,
    },
}

impl StreamApplied {
    /// 会话已经结束，返回需要落盘的项目 ID 和回复文本
    pub fn final_response(&self) -> Option<(&str, &str)> {
        match self {
            StreamApplied::Chunk => None,
            StreamApplied::Finished {
                project_id,
                ai_response,
            }
            | StreamApplied::Failed {
                project_id,
                ai_response,
                ..
            } => Some((project_id, ai_response)),
        }
    }
}

pub struct ProjectWorkflowState {
    role: Role,
    project: Option<Project>,
    epoch: ProjectEpoch,
    tab: Tab,
    overlay: Option<Overlay>,
    form: FormData,
    field_errors: BTreeMap<String, String>,
    generation: GenerationStatus,
    session: Option<StreamSession>,
    next_run: u64,
    aggregator: StreamAggregator,
    updates: mpsc::UnboundedSender<StreamUpdate>,
}

impl ProjectWorkflowState {
    /// 创建状态机
    ///
    /// # 参数
    /// - `role` - 当前用户角色
    /// - `aggregator` - 流式生成聚合器
    /// - `updates` - 流式事件回传通道，接收端由调用方驱动并交给 `apply_stream_update`
    pub fn new(
        role: Role,
        aggregator: StreamAggregator,
        updates: mpsc::UnboundedSender<StreamUpdate>,
    ) -> Self {
        Self {
            role,
            project: None,
            epoch: ProjectEpoch::new(),
            tab: Tab::Form,
            overlay: None,
            form: FormData::new(),
            field_errors: BTreeMap::new(),
            generation: GenerationStatus::Idle,
            session: None,
            next_run: 0,
            aggregator,
            updates,
        }
    }

    // ======== 只读访问 ========

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn project(&self) -> Option<&Project> {
        self.project.as_ref()
    }

    pub fn active_id(&self) -> Option<&str> {
        self.project.as_ref().map(|p| p.id.as_str())
    }

    pub fn tab(&self) -> Tab {
        self.tab
    }

    pub fn overlay(&self) -> Option<Overlay> {
        self.overlay
    }

    pub fn form(&self) -> &FormData {
        &self.form
    }

    pub fn generation(&self) -> &GenerationStatus {
        &self.generation
    }

    /// 当前可以切换到的标签页
    pub fn reachable_tabs(&self) -> Vec<Tab> {
        let mut tabs = vec![Tab::Form];
        if self.role.can_edit() {
            tabs.push(Tab::Template);
        }
        if self.project.as_ref().is_some_and(|p| !p.template_is_blank()) {
            tabs.push(Tab::Result);
        }
        tabs
    }

    /// 必填字段：已声明、且在当前模板中出现的变量，按声明顺序
    pub fn required_fields(&self) -> Vec<String> {
        let Some(project) = &self.project else {
            return vec![];
        };
        let used = placeholder::scan_placeholders(&project.template);
        project
            .available_variables
            .iter()
            .filter(|v| used.contains(v))
            .cloned()
            .collect()
    }

    /// 模板中出现、但没有声明的占位符
    pub fn undeclared_placeholders(&self) -> Vec<String> {
        let Some(project) = &self.project else {
            return vec![];
        };
        placeholder::scan_placeholders(&project.template)
            .into_iter()
            .filter(|name| !project.has_variable(name))
            .collect()
    }

    /// 生成前端渲染用的快照
    pub fn view(&self) -> WorkflowView {
        WorkflowView {
            role: self.role,
            project: self.project.clone(),
            tab: self.tab,
            reachable_tabs: self.reachable_tabs(),
            overlay: self.overlay,
            form: self.form.clone(),
            required_fields: self.required_fields(),
            field_errors: self.field_errors.clone(),
            undeclared_placeholders: self.undeclared_placeholders(),
            generation: self.generation.clone(),
        }
    }

    // ======== 项目与角色 ========

    /// 打开项目（切换当前项目）
    ///
    /// 取消进行中的流式会话、推进项目纪元，用项目的表单数据重建表单缓冲区。
    pub fn open_project(&mut self, project: Project) {
        self.cancel_stream();
        self.epoch.advance();

        self.form = project
            .available_variables
            .iter()
            .map(|v| (v.clone(), project.form_data.get(v).cloned().unwrap_or_default()))
            .collect();
        self.project = Some(project);
        self.tab = Tab::Form;
        self.overlay = None;
        self.field_errors.clear();
        self.generation = GenerationStatus::Idle;
    }

    /// 关闭当前项目
    pub fn close_project(&mut self) {
        self.cancel_stream();
        self.epoch.advance();
        self.project = None;
        self.form.clear();
        self.field_errors.clear();
        self.tab = Tab::Form;
        self.generation = GenerationStatus::Idle;
    }

    /// 持久化层返回了当前项目的新版本时，同步名称、描述和时间戳
    ///
    /// 模板、变量和表单以本地为准，不被覆盖。
    pub fn sync_persisted(&mut self, persisted: &Project) {
        if let Some(project) = self.project.as_mut().filter(|p| p.id == persisted.id) {
            project.name = persisted.name.clone();
            project.description = persisted.description.clone();
            project.updated_at = persisted.updated_at;
        }
    }

    pub fn set_role(&mut self, role: Role) {
        self.role = role;
        self.normalize_tab();
    }

    // ======== 标签页与浮层 ========

    /// 切换标签页
    ///
    /// # 错误
    /// - 只读角色切换到模板页时返回 `PermissionDenied`
    /// - 模板为空时切换到结果页返回 `Validation`
    pub fn select_tab(&mut self, tab: Tab) -> WorkflowResult<()> {
        if tab == Tab::Template && !self.role.can_edit() {
            return Err(WorkflowError::denied("编辑模板"));
        }
        if !self.reachable_tabs().contains(&tab) {
            return Err(WorkflowError::validation("template", "模板为空，无法查看结果"));
        }
        self.overlay = None;
        self.tab = tab;
        Ok(())
    }

    /// 打开创建/编辑浮层
    pub fn begin_overlay(&mut self, overlay: Overlay) -> WorkflowResult<()> {
        if overlay == Overlay::Editing && self.project.is_none() {
            return Err(WorkflowError::NoActiveProject);
        }
        self.overlay = Some(overlay);
        Ok(())
    }

    pub fn end_overlay(&mut self) {
        self.overlay = None;
    }

    fn normalize_tab(&mut self) {
        if !self.reachable_tabs().contains(&self.tab) {
            log::debug!("标签页 {:?} 已不可达，回到表单页", self.tab);
            self.tab = Tab::Form;
        }
    }

    // ======== 变量与模板 ========

    fn require_edit(&self, action: &str) -> WorkflowResult<()> {
        if self.role.can_edit() {
            Ok(())
        } else {
            Err(WorkflowError::denied(action))
        }
    }

    fn active_project(&self) -> WorkflowResult<&Project> {
        self.project.as_ref().ok_or(WorkflowError::NoActiveProject)
    }

    /// 记录字段级错误并原样返回
    fn reject(&mut self, err: WorkflowError) -> WorkflowError {
        if let WorkflowError::Validation { field, message } = &err {
            self.field_errors.insert(field.clone(), message.clone());
        }
        err
    }

    /// 以当前表单缓冲区为准执行一次注册表操作，并回写表单缓冲区
    fn apply_registry(&mut self, op: impl FnOnce(&Project) -> Project) -> WorkflowResult<Project> {
        let mut current = self.active_project()?.clone();
        current.form_data = self.form.clone();

        let next = op(&current);
        self.form = next.form_data.clone();
        self.project = Some(next.clone());
        self.normalize_tab();
        Ok(next)
    }

    /// 添加变量
    ///
    /// # 返回值
    /// 更新后的项目，调用方负责落盘变量、模板和表单
    pub fn add_variable(&mut self, name: &str) -> WorkflowResult<Project> {
        self.require_edit("添加变量")?;
        let project = self.active_project()?;
        let name = registry::validate_name(project, name, None).map_err(|e| self.reject(e))?;
        self.field_errors.remove("name");

        self.apply_registry(|p| registry::add(p, &name))
    }

    /// 重命名变量，模板中的占位符和表单值随之迁移
    pub fn rename_variable(&mut self, old_name: &str, new_name: &str) -> WorkflowResult<Project> {
        self.require_edit("重命名变量")?;
        let project = self.active_project()?;
        let new_name = registry::validate_name(project, new_name, Some(old_name))
            .map_err(|e| self.reject(e))?;
        self.field_errors.remove("newName");
        self.field_errors.remove(old_name);

        self.apply_registry(|p| registry::rename(p, old_name, &new_name))
    }

    /// 删除变量，模板中的所有对应占位符被清空
    pub fn delete_variable(&mut self, name: &str) -> WorkflowResult<Project> {
        self.require_edit("删除变量")?;
        if !self.active_project()?.has_variable(name) {
            let err = WorkflowError::validation("name", format!("变量 \"{}\" 不存在", name));
            return Err(self.reject(err));
        }
        self.field_errors.remove(name);

        self.apply_registry(|p| registry::delete(p, name))
    }

    /// 编辑模板文本
    ///
    /// # 返回值
    /// 当前项目 ID，调用方据此通知自动保存控制器
    pub fn edit_template(&mut self, template: &str) -> WorkflowResult<String> {
        self.require_edit("编辑模板")?;
        let project = self.project.as_mut().ok_or(WorkflowError::NoActiveProject)?;
        project.template = template.to_string();
        let id = project.id.clone();

        self.field_errors.remove("template");
        self.normalize_tab();
        Ok(id)
    }

    // ======== 表单 ========

    /// 修改表单字段
    pub fn set_field(&mut self, name: &str, value: &str) -> WorkflowResult<()> {
        if !self.active_project()?.has_variable(name) {
            return Err(WorkflowError::validation(name, format!("变量 \"{}\" 不存在", name)));
        }
        self.form.insert(name.to_string(), value.to_string());
        self.field_errors.remove(name);
        Ok(())
    }

    /// 切换结果模式
    pub fn set_response_mode(&mut self, mode: ResponseMode) -> WorkflowResult<()> {
        let project = self.project.as_mut().ok_or(WorkflowError::NoActiveProject)?;
        project.response_mode = mode;
        Ok(())
    }

    /// 提交表单
    ///
    /// 校验模板非空、必填字段已填写后渲染模板、记录生成结果并切换到结果页；
    /// 结果模式为 `AI_RESPONSE` 时同时以渲染结果启动流式生成。
    ///
    /// # 错误
    /// 模板为空或缺少必填字段时返回 `Validation`，状态不变（字段错误除外）
    pub fn submit_form(&mut self) -> WorkflowResult<Submission> {
        let project = self.active_project()?;

        if project.template_is_blank() {
            let err = WorkflowError::validation("template", "模板不能为空");
            return Err(self.reject(err));
        }

        let missing: Vec<String> = self
            .required_fields()
            .into_iter()
            .filter(|f| self.form.get(f).is_none_or(|v| v.trim().is_empty()))
            .collect();
        if let Some(first) = missing.first() {
            for field in &missing {
                self.field_errors.insert(field.clone(), "此项为必填".to_string());
            }
            return Err(WorkflowError::validation(first.clone(), "请填写所有必填字段"));
        }

        let rendered =
            substitution::render(&project.template, &project.available_variables, &self.form);
        let response_mode = project.response_mode;
        let project_id = project.id.clone();

        if let Some(project) = self.project.as_mut() {
            project.form_data = self.form.clone();
            project.generated_prompt = rendered.clone();
        }
        self.field_errors.clear();
        self.overlay = None;
        self.tab = Tab::Result;

        let run = match response_mode {
            ResponseMode::AiResponse => Some(self.start_stream(rendered.clone())?),
            ResponseMode::Prompt => {
                self.cancel_stream();
                self.generation = GenerationStatus::Idle;
                None
            }
        };

        Ok(Submission {
            project_id,
            rendered,
            form_data: self.form.clone(),
            response_mode,
            run,
        })
    }

    /// 核对持久化层返回的渲染结果
    ///
    /// 本地渲染结果已经展示并交给生成服务，始终以本地为准。
    /// 两者不一致时返回本地结果，由调用方写回持久化层。
    pub fn confirm_generated(&self, project_id: &str, rendered: &str) -> Option<String> {
        let project = self.project.as_ref().filter(|p| p.id == project_id)?;
        if project.generated_prompt == rendered {
            return None;
        }
        log::warn!("持久化层渲染结果与本地不一致，保留本地结果");
        Some(project.generated_prompt.clone())
    }

    /// 重置：清空生成结果、AI 回复和表单，回到表单页
    ///
    /// # 返回值
    /// 重置后的项目，调用方负责落盘
    pub fn reset(&mut self) -> WorkflowResult<Project> {
        self.active_project()?;
        self.cancel_stream();
        self.epoch.advance();

        for value in self.form.values_mut() {
            value.clear();
        }
        let form = self.form.clone();
        let project = self.project.as_mut().ok_or(WorkflowError::NoActiveProject)?;
        project.generated_prompt.clear();
        project.ai_response.clear();
        project.form_data = form;

        self.field_errors.clear();
        self.tab = Tab::Form;
        self.generation = GenerationStatus::Idle;
        Ok(project.clone())
    }

    // ======== 流式生成 ========

    /// 以上一次生成的提示词重新生成 AI 回复
    pub fn regenerate(&mut self) -> WorkflowResult<u64> {
        let project = self.active_project()?;
        if project.generated_prompt.is_empty() {
            return Err(WorkflowError::validation("generatedPrompt", "请先提交表单生成提示词"));
        }
        let prompt = project.generated_prompt.clone();
        self.tab = Tab::Result;
        self.start_stream(prompt)
    }

    /// 用户主动停止生成，保留已收到的内容
    pub fn cancel_generation(&mut self) -> Option<(String, String)> {
        let session = self.session.take()?;
        session.handle.cancel();
        self.generation = GenerationStatus::Idle;
        let text = self.project.as_ref()?.ai_response.clone();
        Some((session.project_id, text))
    }

    /// 启动流式会话，丢弃此前的会话和累积文本
    fn start_stream(&mut self, prompt: String) -> WorkflowResult<u64> {
        let project_id = self.active_project()?.id.clone();
        self.cancel_stream();

        if let Some(project) = self.project.as_mut() {
            project.ai_response.clear();
        }
        self.next_run += 1;
        let run = self.next_run;

        let (chunk_tx, complete_tx, error_tx) =
            (self.updates.clone(), self.updates.clone(), self.updates.clone());
        let (chunk_id, complete_id, error_id) =
            (project_id.clone(), project_id.clone(), project_id.clone());

        let handle = self.aggregator.start(
            prompt,
            Some(self.epoch.bind()),
            move |chunk, _accumulated| {
                let _ = chunk_tx.send(StreamUpdate {
                    project_id: chunk_id.clone(),
                    run,
                    kind: StreamUpdateKind::Chunk {
                        text: chunk.to_string(),
                    },
                });
            },
            move |_text| {
                let _ = complete_tx.send(StreamUpdate {
                    project_id: complete_id,
                    run,
                    kind: StreamUpdateKind::Completed,
                });
            },
            move |message| {
                let _ = error_tx.send(StreamUpdate {
                    project_id: error_id,
                    run,
                    kind: StreamUpdateKind::Failed { message },
                });
            },
        );

        log::info!("项目 {} 开始第 {} 次流式生成", project_id, run);
        self.session = Some(StreamSession {
            project_id,
            run,
            handle,
        });
        self.generation = GenerationStatus::Streaming { run };
        Ok(run)
    }

    fn cancel_stream(&mut self) {
        if let Some(session) = self.session.take() {
            log::debug!("取消项目 {} 的第 {} 次流式生成", session.project_id, session.run);
            session.handle.cancel();
        }
    }

    /// 应用一个流式事件
    ///
    /// 事件的项目 ID 或运行序号与当前会话不一致时丢弃，返回 `None`。
    pub fn apply_stream_update(&mut self, update: StreamUpdate) -> Option<StreamApplied> {
        let matches = self
            .session
            .as_ref()
            .is_some_and(|s| s.project_id == update.project_id && s.run == update.run)
            && self.active_id() == Some(update.project_id.as_str());
        if !matches {
            log::debug!("丢弃过期的流式事件: 项目 {} 第 {} 次", update.project_id, update.run);
            return None;
        }

        let project = self.project.as_mut()?;
        match update.kind {
            StreamUpdateKind::Chunk { text } => {
                project.ai_response.push_str(&text);
                Some(StreamApplied::Chunk)
            }
            StreamUpdateKind::Completed => {
                self.session = None;
                self.generation = GenerationStatus::Completed { run: update.run };
                Some(StreamApplied::Finished {
                    project_id: update.project_id,
                    ai_response: project.ai_response.clone(),
                })
            }
            StreamUpdateKind::Failed { message } => {
                if !project.ai_response.is_empty() {
                    project.ai_response.push_str("\n\n");
                }
                project
                    .ai_response
                    .push_str(&format!("{} {}", STREAM_ERROR_MARKER, message));
                self.session = None;
                self.generation = GenerationStatus::Failed {
                    run: update.run,
                    message: message.clone(),
                };
                Some(StreamApplied::Failed {
                    project_id: update.project_id,
                    ai_response: project.ai_response.clone(),
                    error: WorkflowError::Stream { message },
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::models::project::ProjectDraft;
    use crate::test_support::ChannelBackend;

    struct Harness {
        state: ProjectWorkflowState,
        backend: Arc<ChannelBackend>,
        updates: mpsc::UnboundedReceiver<StreamUpdate>,
    }

    impl Harness {
        fn new(role: Role) -> Self {
            let backend = Arc::new(ChannelBackend::new());
            let (tx, updates) = mpsc::unbounded_channel();
            let state = ProjectWorkflowState::new(role, StreamAggregator::new(backend.clone()), tx);
            Self {
                state,
                backend,
                updates,
            }
        }

        /// 等待后台任务运行，然后把收到的事件全部应用到状态机
        async fn pump(&mut self) -> Vec<Option<StreamApplied>> {
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
            let mut applied = Vec::new();
            while let Ok(update) = self.updates.try_recv() {
                applied.push(self.state.apply_stream_update(update));
            }
            applied
        }
    }

    fn project(id: &str, template: &str, vars: &[&str]) -> Project {
        ProjectDraft {
            name: format!("项目 {}", id),
            available_variables: Some(vars.iter().map(|v| v.to_string()).collect()),
            template: Some(template.to_string()),
            ..ProjectDraft::default()
        }
        .into_project(id.to_string(), Utc::now())
    }

    fn scenario(id: &str) -> Project {
        project(id, "Hello {name}, your goal is {goal}.", &["name", "goal"])
    }

    #[test]
    fn test_open_project_builds_form_buffer() {
        let mut h = Harness::new(Role::Admin);
        let mut p = scenario("p1");
        p.form_data.insert("name".into(), "Ana".into());
        h.state.open_project(p);

        assert_eq!(h.state.form().get("name").map(String::as_str), Some("Ana"));
        assert_eq!(h.state.form().get("goal").map(String::as_str), Some(""));
        assert_eq!(h.state.tab(), Tab::Form);
    }

    #[test]
    fn test_submit_renders_and_moves_to_result() {
        let mut h = Harness::new(Role::Admin);
        h.state.open_project(scenario("p1"));
        h.state.set_field("name", "Ana").unwrap();
        h.state.set_field("goal", "launch").unwrap();

        let submission = h.state.submit_form().unwrap();

        assert_eq!(submission.rendered, "Hello Ana, your goal is launch.");
        assert_eq!(submission.run, None);
        assert_eq!(h.state.tab(), Tab::Result);
        assert_eq!(
            h.state.project().unwrap().generated_prompt,
            "Hello Ana, your goal is launch."
        );
    }

    #[test]
    fn test_submit_with_missing_required_field_stays_on_form() {
        let mut h = Harness::new(Role::Admin);
        h.state.open_project(scenario("p1"));
        h.state.set_field("name", "Ana").unwrap();

        let err = h.state.submit_form().unwrap_err();

        assert!(matches!(err, WorkflowError::Validation { ref field, .. } if field == "goal"));
        assert_eq!(h.state.tab(), Tab::Form);
        assert!(h.state.view().field_errors.contains_key("goal"));
        assert!(h.state.project().unwrap().generated_prompt.is_empty());
    }

    #[test]
    fn test_declared_but_unused_variable_not_required() {
        let mut h = Harness::new(Role::Admin);
        h.state.open_project(project("p1", "Only {a}", &["a", "b"]));
        h.state.set_field("a", "x").unwrap();

        assert_eq!(h.state.required_fields(), vec!["a"]);
        assert_eq!(h.state.submit_form().unwrap().rendered, "Only x");
    }

    #[test]
    fn test_result_unreachable_with_blank_template() {
        let mut h = Harness::new(Role::Admin);
        h.state.open_project(scenario("p1"));
        h.state.select_tab(Tab::Result).unwrap();

        h.state.edit_template("   ").unwrap();
        assert_eq!(h.state.tab(), Tab::Form);
        assert!(!h.state.reachable_tabs().contains(&Tab::Result));
        assert!(h.state.select_tab(Tab::Result).is_err());
        assert!(h.state.submit_form().is_err());
    }

    #[test]
    fn test_viewer_cannot_reach_template_tab() {
        let mut h = Harness::new(Role::Admin);
        h.state.open_project(scenario("p1"));
        h.state.select_tab(Tab::Template).unwrap();

        h.state.set_role(Role::Viewer);
        assert_eq!(h.state.tab(), Tab::Form);
        assert_eq!(h.state.reachable_tabs(), vec![Tab::Form, Tab::Result]);
        assert!(matches!(
            h.state.select_tab(Tab::Template),
            Err(WorkflowError::PermissionDenied { .. })
        ));
        assert!(h.state.add_variable("x").is_err());
        assert!(h.state.edit_template("x").is_err());
    }

    #[test]
    fn test_rename_migrates_unsaved_form_value() {
        let mut h = Harness::new(Role::Admin);
        h.state.open_project(scenario("p1"));
        h.state.set_field("name", "Ana").unwrap();

        let next = h.state.rename_variable("name", "fullName").unwrap();

        assert_eq!(next.template, "Hello {fullName}, your goal is {goal}.");
        assert_eq!(h.state.form().get("fullName").map(String::as_str), Some("Ana"));
        assert!(!h.state.form().contains_key("name"));
        assert_eq!(next.form_data, *h.state.form());
    }

    #[test]
    fn test_duplicate_add_records_field_error() {
        let mut h = Harness::new(Role::Admin);
        h.state.open_project(scenario("p1"));

        assert!(h.state.add_variable("goal").is_err());
        assert!(h.state.view().field_errors.contains_key("name"));

        h.state.add_variable("tone").unwrap();
        assert!(!h.state.view().field_errors.contains_key("name"));
        assert_eq!(h.state.form().get("tone").map(String::as_str), Some(""));
    }

    #[test]
    fn test_delete_then_render_has_no_placeholder() {
        let mut h = Harness::new(Role::Admin);
        h.state.open_project(scenario("p1"));
        h.state.set_field("name", "Ana").unwrap();

        let next = h.state.delete_variable("goal").unwrap();
        assert_eq!(next.template, "Hello {name}, your goal is .");
        assert_eq!(next.available_variables, vec!["name"]);

        let rendered = h.state.submit_form().unwrap().rendered;
        assert!(!rendered.contains("{goal}"));
    }

    #[test]
    fn test_undeclared_placeholders_reported() {
        let mut h = Harness::new(Role::Admin);
        h.state.open_project(scenario("p1"));
        h.state.edit_template("{name} {mystery}").unwrap();

        assert_eq!(h.state.view().undeclared_placeholders, vec!["mystery"]);
    }

    #[tokio::test]
    async fn test_ai_response_streams_into_project() {
        let mut h = Harness::new(Role::Admin);
        let mut p = scenario("p1");
        p.response_mode = ResponseMode::AiResponse;
        h.state.open_project(p);
        h.state.set_field("name", "Ana").unwrap();
        h.state.set_field("goal", "launch").unwrap();
        let session = h.backend.push_session();

        let submission = h.state.submit_form().unwrap();
        assert_eq!(submission.run, Some(1));
        assert!(h.state.generation().is_streaming());

        session.send(Ok("Sure, ".into())).unwrap();
        session.send(Ok("here it is.".into())).unwrap();
        drop(session);
        let applied = h.pump().await;

        assert_eq!(h.state.project().unwrap().ai_response, "Sure, here it is.");
        assert_eq!(h.state.generation(), &GenerationStatus::Completed { run: 1 });
        assert!(matches!(applied.last(), Some(Some(StreamApplied::Finished { .. }))));
        assert_eq!(h.backend.prompts(), vec!["Hello Ana, your goal is launch."]);
    }

    #[tokio::test]
    async fn test_switching_project_isolates_stream() {
        let mut h = Harness::new(Role::Admin);
        let mut p1 = project("p1", "{a}", &["a"]);
        p1.response_mode = ResponseMode::AiResponse;
        h.state.open_project(p1);
        h.state.set_field("a", "x").unwrap();
        let session = h.backend.push_session();
        h.state.submit_form().unwrap();

        session.send(Ok("for p1".into())).unwrap();
        h.pump().await;
        assert_eq!(h.state.project().unwrap().ai_response, "for p1");

        h.state.open_project(project("p2", "{b}", &["b"]));
        let _ = session.send(Ok(" late".into()));
        drop(session);
        let applied = h.pump().await;

        assert!(applied.iter().all(|a| a.is_none()));
        assert_eq!(h.state.project().unwrap().ai_response, "");
        assert_eq!(h.state.generation(), &GenerationStatus::Idle);
    }

    #[tokio::test]
    async fn test_stream_error_appends_marker_and_keeps_prompt() {
        let mut h = Harness::new(Role::Admin);
        let mut p = project("p1", "{a}", &["a"]);
        p.response_mode = ResponseMode::AiResponse;
        h.state.open_project(p);
        h.state.set_field("a", "x").unwrap();
        let session = h.backend.push_session();
        h.state.submit_form().unwrap();

        session.send(Ok("partial".into())).unwrap();
        session.send(Err("连接被重置".into())).unwrap();
        let applied = h.pump().await;

        assert!(matches!(
            applied.last(),
            Some(Some(StreamApplied::Failed { error: WorkflowError::Stream { .. }, .. }))
        ));

        let project = h.state.project().unwrap();
        assert_eq!(project.ai_response, "partial\n\n[生成中断] 连接被重置");
        assert_eq!(project.generated_prompt, "x");
        assert!(matches!(h.state.generation(), GenerationStatus::Failed { .. }));
    }

    #[tokio::test]
    async fn test_regenerate_discards_previous_buffer() {
        let mut h = Harness::new(Role::Admin);
        let mut p = project("p1", "{a}", &["a"]);
        p.response_mode = ResponseMode::AiResponse;
        h.state.open_project(p);
        h.state.set_field("a", "x").unwrap();

        let first = h.backend.push_session();
        h.state.submit_form().unwrap();
        first.send(Ok("old answer".into())).unwrap();
        h.pump().await;

        let second = h.backend.push_session();
        assert_eq!(h.state.regenerate().unwrap(), 2);
        assert_eq!(h.state.project().unwrap().ai_response, "");

        let _ = first.send(Ok(" stale".into()));
        second.send(Ok("new answer".into())).unwrap();
        drop(second);
        h.pump().await;

        assert_eq!(h.state.project().unwrap().ai_response, "new answer");
    }

    #[tokio::test]
    async fn test_reset_clears_results_and_cancels_stream() {
        let mut h = Harness::new(Role::Admin);
        let mut p = project("p1", "{a}", &["a"]);
        p.response_mode = ResponseMode::AiResponse;
        h.state.open_project(p);
        h.state.set_field("a", "x").unwrap();
        let session = h.backend.push_session();
        h.state.submit_form().unwrap();

        let reset = h.state.reset().unwrap();
        let _ = session.send(Ok("late".into()));
        let applied = h.pump().await;

        assert!(applied.iter().all(|a| a.is_none()));
        assert!(reset.generated_prompt.is_empty());
        assert!(reset.ai_response.is_empty());
        assert_eq!(h.state.form().get("a").map(String::as_str), Some(""));
        assert_eq!(h.state.tab(), Tab::Form);
    }
}
