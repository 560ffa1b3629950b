//! # Studio 协调器
//!
//! 把工作流状态机、自动保存控制器、持久化层和项目列表缓存组合在一起，
//! 作为 IPC 层（以及无界面嵌入方）唯一的入口。
//!
//! ## 锁约定
//! 工作流状态放在 `std::sync::Mutex` 中，所有同步操作在锁内完成，
//! 落盘等异步操作在释放锁之后进行，锁从不跨越 `.await`。
//!
//! ## 错误映射
//! 持久化层返回的 `String` 错误映射为 `WorkflowError::Persistence`；
//! 持久化失败不回滚本地状态。

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::{WorkflowError, WorkflowResult};
use crate::models::project::{Project, ProjectDraft, ProjectPatch, ProjectSummary, ResponseMode};
use crate::models::settings::{AppConfig, Role};
use crate::models::workflow::{Overlay, StreamUpdate, Tab, WorkflowView};
use crate::services::autosave::AutosaveController;
use crate::services::cache::ProjectCache;
use crate::services::store::ProjectStore;
use crate::services::stream::{GenerationBackend, StreamAggregator};
use crate::services::workflow::{ProjectWorkflowState, StreamApplied, Submission};

pub struct Studio {
    store: Arc<dyn ProjectStore>,
    autosave: AutosaveController,
    state: Mutex<ProjectWorkflowState>,
    cache: ProjectCache,
}

impl Studio {
    /// 创建协调器
    ///
    /// # 返回值
    /// `(Studio, 流式事件接收端)`。调用方需要持续读取接收端，
    /// 并把每个事件交给 `apply_stream_update`。
    pub fn new(
        store: Arc<dyn ProjectStore>,
        backend: Arc<dyn GenerationBackend>,
        config: &AppConfig,
    ) -> (Self, mpsc::UnboundedReceiver<StreamUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = ProjectWorkflowState::new(config.role, StreamAggregator::new(backend), tx);
        let autosave = AutosaveController::new(
            Arc::clone(&store),
            Duration::from_millis(config.autosave_quiet_ms),
        );

        let studio = Self {
            store,
            autosave,
            state: Mutex::new(state),
            cache: ProjectCache::new(),
        };
        (studio, rx)
    }

    pub fn autosave(&self) -> &AutosaveController {
        &self.autosave
    }

    fn state(&self) -> MutexGuard<'_, ProjectWorkflowState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn view(&self) -> WorkflowView {
        self.state().view()
    }

    pub fn role(&self) -> Role {
        self.state().role()
    }

    pub fn set_role(&self, role: Role) -> WorkflowView {
        let mut state = self.state();
        state.set_role(role);
        state.view()
    }

    fn require_edit(&self, action: &str) -> WorkflowResult<()> {
        if self.role().can_edit() {
            Ok(())
        } else {
            Err(WorkflowError::denied(action))
        }
    }

    // ======== 项目列表 ========

    /// 项目摘要列表，按最近修改倒序
    ///
    /// 缓存在有效期内时直接返回缓存。
    pub async fn list_projects(&self) -> WorkflowResult<Vec<ProjectSummary>> {
        if let Some(cached) = self.cache.get() {
            return Ok(cached);
        }
        let summaries: Vec<ProjectSummary> = self
            .store
            .list_projects()
            .await
            .map_err(WorkflowError::persistence)?
            .iter()
            .map(Project::summary)
            .collect();
        self.cache.set(summaries.clone());
        Ok(summaries)
    }

    /// 按名称和描述搜索项目
    pub async fn search_projects(&self, query: &str) -> WorkflowResult<Vec<ProjectSummary>> {
        if let Some(found) = self.cache.search(query) {
            return Ok(found);
        }
        self.list_projects().await?;
        Ok(self.cache.search(query).unwrap_or_default())
    }

    /// 创建项目并打开它
    pub async fn create_project(&self, draft: ProjectDraft) -> WorkflowResult<WorkflowView> {
        if draft.name.trim().is_empty() {
            let err = WorkflowError::validation("name", "项目名称不能为空");
            return Err(err);
        }
        let project = self
            .store
            .create_project(draft)
            .await
            .map_err(WorkflowError::persistence)?;
        self.cache.invalidate();
        log::info!("创建项目 {} ({})", project.name, project.id);

        self.activate(project).await;
        Ok(self.view())
    }

    /// 打开项目
    pub async fn open_project(&self, id: &str) -> WorkflowResult<WorkflowView> {
        let project = self
            .store
            .get_project(id)
            .await
            .map_err(WorkflowError::persistence)?;
        self.activate(project).await;
        Ok(self.view())
    }

    /// 切换当前项目
    ///
    /// 先把旧项目待保存的模板写回旧项目，再重新绑定自动保存和工作流。
    async fn activate(&self, project: Project) {
        if let Err(e) = self.autosave.flush().await {
            log::warn!("切换项目前保存模板失败，未保存的编辑将被丢弃: {}", e);
        }
        self.autosave
            .switch_project(Some(&project.id), Some(&project.template));
        self.state().open_project(project);
    }

    /// 关闭当前项目
    pub async fn close_project(&self) -> WorkflowView {
        if let Err(e) = self.autosave.flush().await {
            log::warn!("关闭项目前保存模板失败: {}", e);
        }
        self.autosave.switch_project(None, None);
        let mut state = self.state();
        state.close_project();
        state.view()
    }

    /// 删除项目；删除的是当前项目时同时关闭它
    pub async fn delete_project(&self, id: &str) -> WorkflowResult<WorkflowView> {
        self.require_edit("删除项目")?;
        self.store
            .delete_project(id)
            .await
            .map_err(WorkflowError::persistence)?;
        self.cache.invalidate();
        log::info!("删除项目 {}", id);

        let mut state = self.state();
        if state.active_id() == Some(id) {
            self.autosave.switch_project(None, None);
            state.close_project();
        }
        Ok(state.view())
    }

    /// 修改当前项目的名称和描述（编辑浮层）
    pub async fn update_project_meta(
        &self,
        name: &str,
        description: &str,
    ) -> WorkflowResult<WorkflowView> {
        self.require_edit("编辑项目信息")?;
        if name.trim().is_empty() {
            return Err(WorkflowError::validation("name", "项目名称不能为空"));
        }
        let id = self.active_id()?;
        let patch = ProjectPatch {
            name: Some(name.trim().to_string()),
            description: Some(description.trim().to_string()),
            ..ProjectPatch::default()
        };
        let persisted = self
            .store
            .update_project(&id, patch)
            .await
            .map_err(WorkflowError::persistence)?;
        self.cache.invalidate();

        let mut state = self.state();
        state.sync_persisted(&persisted);
        state.end_overlay();
        Ok(state.view())
    }

    fn active_id(&self) -> WorkflowResult<String> {
        self.state()
            .active_id()
            .map(str::to_string)
            .ok_or(WorkflowError::NoActiveProject)
    }

    // ======== 变量与模板 ========

    pub async fn add_variable(&self, name: &str) -> WorkflowResult<WorkflowView> {
        let next = self.state().add_variable(name)?;
        self.persist_variables(next).await
    }

    pub async fn rename_variable(
        &self,
        old_name: &str,
        new_name: &str,
    ) -> WorkflowResult<WorkflowView> {
        let next = self.state().rename_variable(old_name, new_name)?;
        self.persist_variables(next).await
    }

    pub async fn delete_variable(&self, name: &str) -> WorkflowResult<WorkflowView> {
        let next = self.state().delete_variable(name)?;
        self.persist_variables(next).await
    }

    /// 变量操作后把变量列表、模板和表单一起落盘
    ///
    /// 新模板已经包含此前所有未保存的模板编辑，先让自动保存放弃待保存文本，
    /// 避免计时器在落盘期间用旧模板覆盖新模板。
    /// 落盘失败时把完整的变量补丁交给自动保存，下一次静默期结束或刷新时重发。
    async fn persist_variables(&self, next: Project) -> WorkflowResult<WorkflowView> {
        self.autosave.supersede(&next.id, &next.template);

        match self
            .store
            .update_project(&next.id, ProjectPatch::variables_of(&next))
            .await
        {
            Ok(persisted) => {
                self.cache.invalidate();
                let mut state = self.state();
                state.sync_persisted(&persisted);
                Ok(state.view())
            }
            Err(e) => {
                log::warn!("保存变量修改失败，稍后重试: {}", e);
                // 落盘期间可能又有模板编辑，以本地最新状态为准
                let current = self
                    .state()
                    .project()
                    .filter(|p| p.id == next.id)
                    .map(ProjectPatch::variables_of);
                if let Some(patch) = current {
                    self.autosave.retry_variables(&next.id, patch);
                }
                Err(WorkflowError::persistence(e))
            }
        }
    }

    /// 编辑模板，落盘交给自动保存
    pub fn edit_template(&self, template: &str) -> WorkflowResult<WorkflowView> {
        let mut state = self.state();
        let id = state.edit_template(template)?;
        self.autosave.edit(&id, template);
        Ok(state.view())
    }

    // ======== 表单与标签页 ========

    pub fn set_field(&self, name: &str, value: &str) -> WorkflowResult<WorkflowView> {
        let mut state = self.state();
        state.set_field(name, value)?;
        Ok(state.view())
    }

    pub async fn set_response_mode(&self, mode: ResponseMode) -> WorkflowResult<WorkflowView> {
        let id = {
            let mut state = self.state();
            state.set_response_mode(mode)?;
            state.active_id().map(str::to_string)
        };
        if let Some(id) = id {
            let patch = ProjectPatch {
                response_mode: Some(mode),
                ..ProjectPatch::default()
            };
            self.store
                .update_project(&id, patch)
                .await
                .map_err(WorkflowError::persistence)?;
        }
        Ok(self.view())
    }

    pub fn select_tab(&self, tab: Tab) -> WorkflowResult<WorkflowView> {
        let mut state = self.state();
        state.select_tab(tab)?;
        Ok(state.view())
    }

    pub fn begin_overlay(&self, overlay: Overlay) -> WorkflowResult<WorkflowView> {
        let mut state = self.state();
        state.begin_overlay(overlay)?;
        Ok(state.view())
    }

    pub fn end_overlay(&self) -> WorkflowView {
        let mut state = self.state();
        state.end_overlay();
        state.view()
    }

    // ======== 生成 ========

    /// 提交表单
    ///
    /// 先把待保存的模板写入持久化层，再在本地渲染、切换到结果页并（按需）启动流式生成，
    /// 最后通过持久化层的 `generate` 保存表单和生成结果，渲染结果以本地为准。
    pub async fn submit(&self) -> WorkflowResult<Submission> {
        self.autosave
            .flush()
            .await
            .map_err(WorkflowError::persistence)?;

        let submission = self.state().submit_form()?;

        match self
            .store
            .generate(&submission.project_id, submission.form_data.clone())
            .await
        {
            Ok(rendered) => {
                self.cache.invalidate();
                let local = self
                    .state()
                    .confirm_generated(&submission.project_id, &rendered);
                if let Some(local) = local {
                    let patch = ProjectPatch {
                        generated_prompt: Some(local),
                        ..ProjectPatch::default()
                    };
                    if let Err(e) = self.store.update_project(&submission.project_id, patch).await {
                        log::warn!("回写本地渲染结果失败: {}", e);
                    }
                }
            }
            Err(e) => log::warn!("保存生成结果失败，本地结果保留: {}", e),
        }
        Ok(submission)
    }

    /// 以上一次的提示词重新生成 AI 回复
    pub fn regenerate(&self) -> WorkflowResult<u64> {
        self.state().regenerate()
    }

    /// 停止生成，保存已收到的部分
    pub async fn cancel_generation(&self) -> WorkflowResult<WorkflowView> {
        let stopped = self.state().cancel_generation();
        if let Some((project_id, text)) = stopped {
            self.persist_ai_response(&project_id, text).await;
        }
        Ok(self.view())
    }

    /// 重置：清空生成结果、AI 回复和表单
    pub async fn reset(&self) -> WorkflowResult<WorkflowView> {
        let project = self.state().reset()?;
        let patch = ProjectPatch {
            form_data: Some(project.form_data.clone()),
            generated_prompt: Some(String::new()),
            ai_response: Some(String::new()),
            ..ProjectPatch::default()
        };
        self.store
            .update_project(&project.id, patch)
            .await
            .map_err(WorkflowError::persistence)?;
        Ok(self.view())
    }

    /// 应用一个流式事件；生成结束时把最终回复落盘
    pub async fn apply_stream_update(&self, update: StreamUpdate) -> Option<StreamApplied> {
        let applied = self.state().apply_stream_update(update)?;
        if let Some((project_id, ai_response)) = applied.final_response() {
            self.persist_ai_response(project_id, ai_response.to_string()).await;
        }
        if let StreamApplied::Failed { error, .. } = &applied {
            log::warn!("{}", error);
        }
        Some(applied)
    }

    async fn persist_ai_response(&self, project_id: &str, text: String) {
        let patch = ProjectPatch {
            ai_response: Some(text),
            ..ProjectPatch::default()
        };
        if let Err(e) = self.store.update_project(project_id, patch).await {
            log::warn!("保存 AI 回复失败: {}", e);
        }
    }
}
