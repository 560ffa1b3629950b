//! # 项目持久化服务
//!
//! 定义持久化协作方接口 `ProjectStore` 及两种实现：
//! - `JsonFileStore` - 将全部项目保存在数据目录下的一个 JSON 文档中
//! - `MemoryStore` - 仅保存在内存中，用于测试和无界面嵌入
//!
//! 持久化层是 `createdAt` / `updatedAt`、已保存模板和变量列表的唯一来源：
//! 每次成功的写操作都会刷新 `updatedAt`。
//!
//! ## 串行化
//! 每个存储实例内部持有一把异步互斥锁，所有写操作按到达顺序依次执行，
//! 同一项目的修改不会交错。不提供跨字段、跨项目的事务。

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::models::project::{FormData, Project, ProjectDraft, ProjectPatch};
use crate::services::file_guard;
use crate::services::substitution;

/// 存储操作返回的 Future
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, String>> + Send + 'a>>;

/// 持久化协作方接口
///
/// 对应外部接口：`createProject(fields)`、`updateProject(id, partialFields)`、
/// `deleteProject(id)`、`generate(id, formData) -> renderedText`，
/// 另外提供列表和单项读取。
pub trait ProjectStore: Send + Sync {
    /// 读取全部项目，按 `updatedAt` 倒序
    fn list_projects(&self) -> StoreFuture<'_, Vec<Project>>;

    /// 读取单个项目
    fn get_project<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Project>;

    /// 创建项目，分配 ID 和时间戳
    fn create_project(&self, draft: ProjectDraft) -> StoreFuture<'_, Project>;

    /// 部分更新项目，返回更新后的完整项目
    fn update_project<'a>(&'a self, id: &'a str, patch: ProjectPatch) -> StoreFuture<'a, Project>;

    /// 删除整个项目
    fn delete_project<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ()>;

    /// 以已保存的模板和给定表单渲染提示词，
    /// 同时保存表单数据和生成结果，返回渲染后的文本
    fn generate<'a>(&'a self, id: &'a str, form_data: FormData) -> StoreFuture<'a, String>;
}

// ============ 集合操作（两种存储共用） ============

fn find_mut<'a>(projects: &'a mut [Project], id: &str) -> Result<&'a mut Project, String> {
    projects
        .iter_mut()
        .find(|p| p.id == id)
        .ok_or_else(|| format!("未找到 ID 为 '{}' 的项目", id))
}

fn sorted(projects: &[Project]) -> Vec<Project> {
    let mut list = projects.to_vec();
    list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    list
}

fn apply_create(projects: &mut Vec<Project>, draft: ProjectDraft) -> Result<Project, String> {
    if draft.name.trim().is_empty() {
        return Err("项目名称不能为空".to_string());
    }
    let project = draft.into_project(uuid::Uuid::new_v4().to_string(), Utc::now());
    projects.push(project.clone());
    Ok(project)
}

fn apply_update(projects: &mut [Project], id: &str, patch: ProjectPatch) -> Result<Project, String> {
    if let Some(name) = &patch.name {
        if name.trim().is_empty() {
            return Err("项目名称不能为空".to_string());
        }
    }
    let project = find_mut(projects, id)?;
    patch.apply_to(project);
    project.updated_at = Utc::now();
    Ok(project.clone())
}

fn apply_delete(projects: &mut Vec<Project>, id: &str) -> Result<(), String> {
    let before = projects.len();
    projects.retain(|p| p.id != id);
    if projects.len() == before {
        return Err(format!("未找到 ID 为 '{}' 的项目", id));
    }
    Ok(())
}

fn apply_generate(projects: &mut [Project], id: &str, form_data: FormData) -> Result<String, String> {
    let project = find_mut(projects, id)?;

    // 只保留已声明变量的表单值
    let form_data: FormData = form_data
        .into_iter()
        .filter(|(k, _)| project.has_variable(k))
        .collect();

    let rendered = substitution::render(&project.template, &project.available_variables, &form_data);
    project.form_data = form_data;
    project.generated_prompt = rendered.clone();
    project.updated_at = Utc::now();
    Ok(rendered)
}

// ============ 内存存储 ============

/// 内存存储
///
/// 数据只存在于进程内，进程退出即丢失。
#[derive(Default)]
pub struct MemoryStore {
    projects: Mutex<Vec<Project>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectStore for MemoryStore {
    fn list_projects(&self) -> StoreFuture<'_, Vec<Project>> {
        Box::pin(async move { Ok(sorted(&self.projects.lock().await)) })
    }

    fn get_project<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Project> {
        Box::pin(async move {
            let mut projects = self.projects.lock().await;
            find_mut(&mut projects, id).map(|p| p.clone())
        })
    }

    fn create_project(&self, draft: ProjectDraft) -> StoreFuture<'_, Project> {
        Box::pin(async move { apply_create(&mut *self.projects.lock().await, draft) })
    }

    fn update_project<'a>(&'a self, id: &'a str, patch: ProjectPatch) -> StoreFuture<'a, Project> {
        Box::pin(async move { apply_update(&mut self.projects.lock().await, id, patch) })
    }

    fn delete_project<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move { apply_delete(&mut *self.projects.lock().await, id) })
    }

    fn generate<'a>(&'a self, id: &'a str, form_data: FormData) -> StoreFuture<'a, String> {
        Box::pin(async move { apply_generate(&mut self.projects.lock().await, id, form_data) })
    }
}

// ============ JSON 文件存储 ============

/// `projects.json` 文档结构
#[derive(Debug, Default, Serialize, Deserialize)]
struct ProjectsDocument {
    #[serde(default)]
    projects: Vec<Project>,
}

/// JSON 文件存储
///
/// 首次访问时从磁盘加载文档并缓存在内存中；
/// 每次写操作先在副本上修改，通过 `file_guard` 写盘成功后才提交到内存，
/// 写盘失败时内存中的数据保持不变。
pub struct JsonFileStore {
    /// 数据根目录（路径安全验证的边界）
    root: PathBuf,
    /// `projects.json` 的完整路径
    file_path: PathBuf,
    /// 已加载的项目列表；`None` 表示尚未从磁盘加载
    projects: Mutex<Option<Vec<Project>>>,
}

impl JsonFileStore {
    /// 创建文件存储
    ///
    /// # 参数
    /// - `root` - 数据根目录（如 `~/.mo/PromptStudio/`）
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let file_path = root.join("projects.json");
        Self {
            root,
            file_path,
            projects: Mutex::new(None),
        }
    }

    /// 从磁盘读取文档；文件不存在时返回空列表
    async fn load(&self) -> Result<Vec<Project>, String> {
        if !self.file_path.exists() {
            return Ok(vec![]);
        }

        let content = tokio::fs::read_to_string(&self.file_path)
            .await
            .map_err(|e| format!("读取项目数据文件失败: {}", e))?;

        let document: ProjectsDocument =
            serde_json::from_str(&content).map_err(|e| format!("解析项目数据文件失败: {}", e))?;

        log::info!("已加载 {} 个项目", document.projects.len());
        Ok(document.projects)
    }

    async fn persist(&self, projects: &[Project]) -> Result<(), String> {
        let document = ProjectsDocument {
            projects: projects.to_vec(),
        };
        let content = serde_json::to_string_pretty(&document)
            .map_err(|e| format!("序列化项目数据失败: {}", e))?;

        file_guard::safe_write_file(&self.root, &self.file_path, content.as_bytes()).await
    }

    /// 在锁内读取当前列表（必要时先加载）
    async fn read<T>(&self, f: impl FnOnce(&mut Vec<Project>) -> Result<T, String>) -> Result<T, String> {
        let mut guard = self.projects.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        match guard.as_mut() {
            Some(projects) => f(projects),
            None => Err("项目数据未加载".to_string()),
        }
    }

    /// 在锁内修改副本、写盘，成功后提交
    async fn write<T>(&self, f: impl FnOnce(&mut Vec<Project>) -> Result<T, String>) -> Result<T, String> {
        let mut guard = self.projects.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }

        let mut working = guard.clone().unwrap_or_default();
        let result = f(&mut working)?;
        self.persist(&working).await?;
        *guard = Some(working);
        Ok(result)
    }
}

impl ProjectStore for JsonFileStore {
    fn list_projects(&self) -> StoreFuture<'_, Vec<Project>> {
        Box::pin(self.read(|projects| Ok(sorted(projects))))
    }

    fn get_project<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Project> {
        Box::pin(self.read(move |projects| find_mut(projects, id).map(|p| p.clone())))
    }

    fn create_project(&self, draft: ProjectDraft) -> StoreFuture<'_, Project> {
        Box::pin(self.write(move |projects| apply_create(projects, draft)))
    }

    fn update_project<'a>(&'a self, id: &'a str, patch: ProjectPatch) -> StoreFuture<'a, Project> {
        Box::pin(self.write(move |projects| apply_update(projects, id, patch)))
    }

    fn delete_project<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(self.write(move |projects| apply_delete(projects, id)))
    }

    fn generate<'a>(&'a self, id: &'a str, form_data: FormData) -> StoreFuture<'a, String> {
        Box::pin(self.write(move |projects| apply_generate(projects, id, form_data)))
    }
}
