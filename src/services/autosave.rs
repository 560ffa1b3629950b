//! # 模板自动保存控制器
//!
//! 对模板文本的逐键编辑做防抖，在静默期结束后把最新快照交给持久化层。
//!
//! ## 状态机
//! ```text
//! Idle ──edit──▶ PendingChange ──静默期结束──▶ Saving ──成功──▶ Idle
//!                  ▲    │                         │
//!                  └edit┘                         └──失败──▶ Error ──edit──▶ PendingChange
//! ```
//! - 每次编辑都重启计时器，而不是排队：保存的永远是最新快照
//! - 计时器触发时，待保存文本与上次成功保存的文本相同则不保存
//! - 保存失败不回滚本地编辑，下一次编辑（即使文本相同）重新进入防抖
//! - 变量增删改落盘失败时，变量列表和表单作为待保存补丁交给控制器，
//!   与下一次模板保存一起发出，直到成功或被新的变量操作取代
//!
//! ## 项目隔离
//! 每个控制器同一时刻只绑定一个项目。切换项目会取消计时器并丢弃待保存文本；
//! 旧项目的保存请求即使晚到完成，也只写入旧项目自己的记录，不会改动控制器状态。

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::models::project::ProjectPatch;
use crate::services::store::ProjectStore;

/// 自动保存状态，前端据此显示"保存中"标记
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum AutosaveStatus {
    Idle,
    PendingChange,
    Saving,
    Error { message: String },
}

/// 控制器内部状态
struct AutosaveInner {
    /// 当前绑定的项目
    project_id: Option<String>,
    /// 项目会话序号：每次切换项目递增，用于识别晚到的保存结果
    session: u64,
    /// 编辑序号：每次编辑、切换、覆盖递增，计时器据此判断自己是否已过期
    epoch: u64,
    /// 等待保存的最新文本
    pending: Option<String>,
    /// 落盘失败、等待重发的变量列表和表单
    pending_variables: Option<ProjectPatch>,
    /// 最近一次成功保存（或从持久化层加载）的文本
    baseline: Option<String>,
    /// `baseline` 对应的编辑序号，防止较早的保存结果覆盖较新的基线
    baseline_epoch: u64,
    /// 当前的静默期计时器
    timer: Option<JoinHandle<()>>,
    /// 正在进行中的保存请求数
    in_flight: usize,
}

struct Shared {
    store: Arc<dyn ProjectStore>,
    quiet_period: Duration,
    inner: Mutex<AutosaveInner>,
    status: watch::Sender<AutosaveStatus>,
}

/// 一次保存的来源
enum Trigger {
    /// 静默期计时器触发，只有编辑序号仍匹配时才保存
    Timer(u64),
    /// 调用方主动刷新，立即保存当前待保存文本
    Flush,
}

/// 模板自动保存控制器
#[derive(Clone)]
pub struct AutosaveController {
    shared: Arc<Shared>,
}

impl AutosaveController {
    /// 创建控制器
    ///
    /// # 参数
    /// - `store` - 持久化协作方
    /// - `quiet_period` - 最后一次编辑后等待多久才保存
    pub fn new(store: Arc<dyn ProjectStore>, quiet_period: Duration) -> Self {
        let (status, _) = watch::channel(AutosaveStatus::Idle);
        Self {
            shared: Arc::new(Shared {
                store,
                quiet_period,
                inner: Mutex::new(AutosaveInner {
                    project_id: None,
                    session: 0,
                    epoch: 0,
                    pending: None,
                    pending_variables: None,
                    baseline: None,
                    baseline_epoch: 0,
                    timer: None,
                    in_flight: 0,
                }),
                status,
            }),
        }
    }

    /// 当前状态
    pub fn status(&self) -> AutosaveStatus {
        self.shared.status.borrow().clone()
    }

    /// 是否有保存请求正在进行
    pub fn is_saving(&self) -> bool {
        self.status() == AutosaveStatus::Saving
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> watch::Receiver<AutosaveStatus> {
        self.shared.status.subscribe()
    }

    /// 切换绑定的项目
    ///
    /// 取消旧项目的计时器并丢弃其待保存文本（不保存）。
    /// `template` 为新项目已持久化的模板，作为新的基线。
    pub fn switch_project(&self, project_id: Option<&str>, template: Option<&str>) {
        let mut inner = self.shared.lock();
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        if inner.pending.take().is_some() {
            log::debug!("切换项目，丢弃未保存的模板编辑");
        }
        if inner.pending_variables.take().is_some() {
            log::warn!("切换项目，丢弃未保存的变量修改");
        }
        inner.project_id = project_id.map(str::to_string);
        inner.session += 1;
        inner.epoch += 1;
        inner.baseline = template.map(str::to_string);
        inner.baseline_epoch = inner.epoch;
        inner.in_flight = 0;
        drop(inner);

        self.shared.status.send_replace(AutosaveStatus::Idle);
    }

    /// 记录一次模板编辑并重启静默期计时器
    ///
    /// 编辑不属于当前绑定的项目时忽略。
    pub fn edit(&self, project_id: &str, template: &str) {
        let mut inner = self.shared.lock();
        if inner.project_id.as_deref() != Some(project_id) {
            log::debug!("忽略非当前项目 {} 的模板编辑", project_id);
            return;
        }

        inner.pending = Some(template.to_string());
        self.restart_timer(inner);
    }

    /// 变量增删改落盘失败时调用，由自动保存接管重试
    ///
    /// `patch` 为 `ProjectPatch::variables_of` 生成的完整变量补丁。
    /// 其中的模板成为待保存文本，变量列表和表单随下一次保存一起发出，
    /// 即使模板与基线相同也会发出。
    pub fn retry_variables(&self, project_id: &str, patch: ProjectPatch) {
        let mut inner = self.shared.lock();
        if inner.project_id.as_deref() != Some(project_id) {
            return;
        }

        let ProjectPatch {
            available_variables,
            template,
            form_data,
            ..
        } = patch;
        if let Some(template) = template {
            inner.pending = Some(template);
        }
        inner.pending_variables = Some(ProjectPatch {
            available_variables,
            form_data,
            ..Default::default()
        });
        self.restart_timer(inner);
    }

    fn restart_timer(&self, mut inner: MutexGuard<'_, AutosaveInner>) {
        inner.epoch += 1;
        let epoch = inner.epoch;

        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        let shared = Arc::clone(&self.shared);
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(shared.quiet_period).await;
            // 计时器触发的保存失败已经通过状态上报，这里无需处理返回值
            let _ = shared.save(Trigger::Timer(epoch)).await;
        }));
        drop(inner);

        self.shared.status.send_replace(AutosaveStatus::PendingChange);
    }

    /// 立即保存待保存的文本
    ///
    /// 在生成前调用，保证持久化层中的模板与本地一致。
    /// 没有待保存文本、或文本与基线相同时直接返回成功。
    pub async fn flush(&self) -> Result<(), String> {
        {
            let mut inner = self.shared.lock();
            if let Some(timer) = inner.timer.take() {
                timer.abort();
            }
        }
        self.shared.save(Trigger::Flush).await
    }

    /// 变量增删改已经把更新后的模板写入持久化层时调用
    ///
    /// 丢弃待保存文本（它已经包含在新模板里或已被新模板取代）和待重发的变量补丁，
    /// 并把基线改为新模板。
    pub fn supersede(&self, project_id: &str, template: &str) {
        let mut inner = self.shared.lock();
        if inner.project_id.as_deref() != Some(project_id) {
            return;
        }
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        inner.pending = None;
        inner.pending_variables = None;
        inner.epoch += 1;
        inner.baseline = Some(template.to_string());
        inner.baseline_epoch = inner.epoch;
        let saving = inner.in_flight > 0;
        drop(inner);

        if !saving {
            self.shared.status.send_replace(AutosaveStatus::Idle);
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, AutosaveInner> {
        // 锁内不会 panic，中毒时沿用内部数据
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 执行一次保存
    ///
    /// # 返回值
    /// - `Ok(())` - 保存成功，或者没有需要保存的内容
    /// - `Err(message)` - 持久化失败（同时已通过状态上报）
    async fn save(&self, trigger: Trigger) -> Result<(), String> {
        // 1. 锁内取出待保存快照
        let (project_id, session, epoch, text, variables) = {
            let mut inner = self.lock();
            if let Trigger::Timer(epoch) = trigger {
                if inner.epoch != epoch {
                    return Ok(());
                }
                inner.timer = None;
            }
            let Some(project_id) = inner.project_id.clone() else {
                return Ok(());
            };
            let Some(text) = inner.pending.take() else {
                return Ok(());
            };
            let variables = inner.pending_variables.take();
            if variables.is_none() && inner.baseline.as_deref() == Some(text.as_str()) {
                drop(inner);
                self.status.send_replace(AutosaveStatus::Idle);
                return Ok(());
            }
            inner.in_flight += 1;
            (project_id, inner.session, inner.epoch, text, variables)
        };

        let patch = match &variables {
            Some(variables) => ProjectPatch {
                template: Some(text.clone()),
                ..variables.clone()
            },
            None => ProjectPatch::template(text.clone()),
        };
        self.status.send_replace(AutosaveStatus::Saving);

        // 2. 锁外等待持久化
        let result = self
            .store
            .update_project(&project_id, patch)
            .await;

        // 3. 回到锁内，只有仍是同一个项目会话时才更新状态
        let mut inner = self.lock();
        if inner.session != session {
            log::debug!("项目 {} 的自动保存在切换项目后完成，忽略结果", project_id);
            return result.map(|_| ());
        }
        inner.in_flight = inner.in_flight.saturating_sub(1);

        let next = match &result {
            Ok(_) => {
                if epoch >= inner.baseline_epoch {
                    inner.baseline = Some(text);
                    inner.baseline_epoch = epoch;
                }
                log::debug!("项目 {} 的模板已自动保存", project_id);
                if inner.in_flight > 0 {
                    AutosaveStatus::Saving
                } else if inner.pending.is_some() {
                    AutosaveStatus::PendingChange
                } else {
                    AutosaveStatus::Idle
                }
            }
            Err(message) => {
                log::warn!("项目 {} 的模板自动保存失败: {}", project_id, message);
                // 本地编辑不回滚：没有更新的编辑时保留失败的文本，供下一次 flush 重试
                if inner.pending.is_none() {
                    inner.pending = Some(text);
                }
                if inner.pending_variables.is_none() {
                    inner.pending_variables = variables;
                }
                AutosaveStatus::Error {
                    message: message.clone(),
                }
            }
        };
        drop(inner);
        self.status.send_replace(next);

        result.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::project::ProjectDraft;
    use crate::test_support::RecordingStore;

    const QUIET: Duration = Duration::from_millis(1000);

    async fn setup() -> (Arc<RecordingStore>, AutosaveController, String) {
        let store = Arc::new(RecordingStore::new());
        let project = store
            .create_project(ProjectDraft::new("自动保存", ""))
            .await
            .unwrap();
        let autosave = AutosaveController::new(store.clone(), QUIET);
        autosave.switch_project(Some(&project.id), Some(&project.template));
        (store, autosave, project.id)
    }

    async fn wait(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_edits_within_quiet_period_coalesce() {
        let (store, autosave, id) = setup().await;

        autosave.edit(&id, "e1");
        wait(300).await;
        autosave.edit(&id, "e2");
        wait(300).await;
        autosave.edit(&id, "e3");
        assert_eq!(autosave.status(), AutosaveStatus::PendingChange);

        wait(1500).await;
        assert_eq!(store.template_saves(), vec![(id.clone(), "e3".to_string())]);
        assert_eq!(autosave.status(), AutosaveStatus::Idle);
        assert_eq!(store.get_project(&id).await.unwrap().template, "e3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_saved_before_quiet_period() {
        let (store, autosave, id) = setup().await;

        autosave.edit(&id, "draft");
        wait(999).await;
        assert!(store.template_saves().is_empty());

        wait(2).await;
        assert_eq!(store.template_saves().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_text_saved_once() {
        let (store, autosave, id) = setup().await;

        autosave.edit(&id, "same");
        wait(1500).await;
        autosave.edit(&id, "same");
        wait(1500).await;

        assert_eq!(store.template_saves().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_baseline_not_saved() {
        let (store, autosave, id) = setup().await;
        let original = store.get_project(&id).await.unwrap().template;

        autosave.edit(&id, "temporary");
        autosave.edit(&id, &original);
        wait(1500).await;

        assert!(store.template_saves().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_reports_error_and_retries_on_next_edit() {
        let (store, autosave, id) = setup().await;
        let mut status = autosave.subscribe();

        store.set_fail_updates(true);
        autosave.edit(&id, "offline");
        wait(1500).await;
        assert!(matches!(autosave.status(), AutosaveStatus::Error { .. }));
        assert!(status.has_changed().unwrap());

        store.set_fail_updates(false);
        autosave.edit(&id, "offline");
        wait(1500).await;
        assert_eq!(autosave.status(), AutosaveStatus::Idle);
        assert_eq!(store.get_project(&id).await.unwrap().template, "offline");
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_project_discards_pending_edit() {
        let (store, autosave, id) = setup().await;
        let other = store.create_project(ProjectDraft::new("另一个", "")).await.unwrap();

        autosave.edit(&id, "stale text");
        autosave.switch_project(Some(&other.id), Some(&other.template));
        wait(1500).await;

        assert!(store.template_saves().is_empty());
        assert_eq!(store.get_project(&other.id).await.unwrap().template, other.template);
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_completing_after_switch_leaves_new_project_alone() {
        let (store, autosave, id) = setup().await;
        let other = store.create_project(ProjectDraft::new("另一个", "")).await.unwrap();

        let release = store.hold_next_update();
        autosave.edit(&id, "written late");
        wait(1500).await;
        assert!(autosave.is_saving());

        autosave.switch_project(Some(&other.id), Some(&other.template));
        assert_eq!(autosave.status(), AutosaveStatus::Idle);
        release.send(()).unwrap();
        wait(10).await;

        // 晚到的结果只落在旧项目自己的记录里
        assert_eq!(store.get_project(&id).await.unwrap().template, "written late");
        assert_eq!(store.get_project(&other.id).await.unwrap().template, other.template);
        assert_eq!(autosave.status(), AutosaveStatus::Idle);

        // 基线仍是新项目的模板：改回原文不会触发保存
        autosave.edit(&other.id, "temporary");
        autosave.edit(&other.id, &other.template);
        wait(1500).await;
        assert_eq!(store.template_saves().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_variable_patch_is_resent_with_template() {
        let (store, autosave, id) = setup().await;
        let mut project = store.get_project(&id).await.unwrap();
        project.available_variables.push("tone".to_string());
        project.form_data.insert("tone".to_string(), String::new());

        // 模板与基线相同，变量补丁仍然要发出
        autosave.retry_variables(&id, ProjectPatch::variables_of(&project));
        assert_eq!(autosave.status(), AutosaveStatus::PendingChange);
        autosave.flush().await.unwrap();

        let saved = store.get_project(&id).await.unwrap();
        assert_eq!(saved.available_variables, project.available_variables);
        assert!(saved.form_data.contains_key("tone"));
        assert_eq!(saved.template, project.template);

        // 发出一次后即清空
        autosave.flush().await.unwrap();
        assert_eq!(store.updates().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_for_inactive_project_ignored() {
        let (store, autosave, _id) = setup().await;

        autosave.edit("someone-else", "text");
        wait(1500).await;

        assert!(store.template_saves().is_empty());
        assert_eq!(autosave.status(), AutosaveStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_saves_immediately() {
        let (store, autosave, id) = setup().await;

        autosave.edit(&id, "flush me");
        autosave.flush().await.unwrap();
        assert_eq!(store.template_saves().len(), 1);

        // 计时器已被取消，不会再保存一次
        wait(1500).await;
        assert_eq!(store.template_saves().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_supersede_drops_pending_text() {
        let (store, autosave, id) = setup().await;

        autosave.edit(&id, "before rename {old}");
        autosave.supersede(&id, "after rename {new}");
        wait(1500).await;
        assert!(store.template_saves().is_empty());

        // 基线已更新：再次编辑为同一文本不会触发保存
        autosave.edit(&id, "after rename {new}");
        wait(1500).await;
        assert!(store.template_saves().is_empty());
    }
}
