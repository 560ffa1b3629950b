//! # 数据模型模块
//!
//! 定义了与前端 TypeScript 类型一一对应的 Rust 数据结构。
//! 所有结构体均派生 `Serialize` 和 `Deserialize`，用于 Tauri IPC 传输和 JSON 文件读写。
//! - `project` - 项目、创建草稿、部分更新和列表摘要
//! - `settings` - 应用配置、用户角色和生成服务配置
//! - `workflow` - 工作流视图快照（标签页、浮层、生成状态）

pub mod project;
pub mod settings;
pub mod workflow;
