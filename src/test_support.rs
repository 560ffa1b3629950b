//! 单元测试共用的协作方替身

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use futures_util::stream;
use tokio::sync::{mpsc, oneshot};

use crate::models::project::{FormData, Project, ProjectDraft, ProjectPatch};
use crate::services::store::{MemoryStore, ProjectStore, StoreFuture};
use crate::services::stream::{GenerationBackend, OpenFuture, TextStream};

/// 记录每次更新请求的内存存储，可以切换为更新失败，也可以挂起下一次更新
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    updates: Mutex<Vec<(String, ProjectPatch)>>,
    fail_updates: AtomicBool,
    held_update: Mutex<Option<oneshot::Receiver<()>>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// 下一次更新请求在返回的发送端触发（或被丢弃）之前不会写入
    pub fn hold_next_update(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.held_update.lock().unwrap() = Some(rx);
        tx
    }

    pub fn updates(&self) -> Vec<(String, ProjectPatch)> {
        self.updates.lock().unwrap().clone()
    }

    /// 只包含模板字段的更新（即自动保存发出的请求）
    pub fn template_saves(&self) -> Vec<(String, String)> {
        self.updates()
            .into_iter()
            .filter(|(_, patch)| {
                patch.available_variables.is_none() && patch.form_data.is_none()
            })
            .filter_map(|(id, patch)| patch.template.map(|t| (id, t)))
            .collect()
    }
}

impl ProjectStore for RecordingStore {
    fn list_projects(&self) -> StoreFuture<'_, Vec<Project>> {
        self.inner.list_projects()
    }

    fn get_project<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Project> {
        self.inner.get_project(id)
    }

    fn create_project(&self, draft: ProjectDraft) -> StoreFuture<'_, Project> {
        self.inner.create_project(draft)
    }

    fn update_project<'a>(&'a self, id: &'a str, patch: ProjectPatch) -> StoreFuture<'a, Project> {
        self.updates.lock().unwrap().push((id.to_string(), patch.clone()));
        if self.fail_updates.load(Ordering::SeqCst) {
            return Box::pin(async { Err("模拟的网络错误".to_string()) });
        }
        let held = self.held_update.lock().unwrap().take();
        Box::pin(async move {
            if let Some(release) = held {
                let _ = release.await;
            }
            self.inner.update_project(id, patch).await
        })
    }

    fn delete_project<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ()> {
        self.inner.delete_project(id)
    }

    fn generate<'a>(&'a self, id: &'a str, form_data: FormData) -> StoreFuture<'a, String> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Box::pin(async { Err("模拟的网络错误".to_string()) });
        }
        self.inner.generate(id, form_data)
    }
}

/// 由测试逐块推送内容的生成后端
///
/// 每次 `open` 取出一个预先登记的会话；没有登记的会话时打开失败。
/// 丢弃发送端即表示流正常结束。
#[derive(Default)]
pub struct ChannelBackend {
    sessions: Mutex<VecDeque<mpsc::UnboundedReceiver<Result<String, String>>>>,
    prompts: Mutex<Vec<String>>,
}

impl ChannelBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_session(&self) -> mpsc::UnboundedSender<Result<String, String>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.lock().unwrap().push_back(rx);
        tx
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl GenerationBackend for ChannelBackend {
    fn open(&self, prompt: String) -> OpenFuture<'_> {
        self.prompts.lock().unwrap().push(prompt);
        let session = self.sessions.lock().unwrap().pop_front();
        Box::pin(async move {
            let rx = session.ok_or_else(|| "生成服务不可用".to_string())?;
            let text: TextStream = Box::pin(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            }));
            Ok(text)
        })
    }
}
