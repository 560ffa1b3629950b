//! # 业务逻辑服务模块
//!
//! 模板引擎与工作流的核心实现，与 Tauri command 层解耦：
//! - `placeholder` - 占位符编解码：`{name}` 的格式化、转义匹配和扫描
//! - `registry` - 变量注册表：增删改变量并同步模板和表单
//! - `substitution` - 替换引擎：按声明顺序渲染模板
//! - `autosave` - 模板编辑的防抖自动保存
//! - `stream` - 流式生成聚合器和项目纪元绑定
//! - `generation` - 基于 HTTP SSE 的生成后端
//! - `workflow` - 当前项目的工作流状态机
//! - `studio` - 协调器：工作流、自动保存、持久化和缓存的组合入口
//! - `store` - 持久化协作方接口及 JSON 文件/内存实现
//! - `file_guard` - 文件写入守卫：路径验证 + 备份 + 原子替换
//! - `cache` - 项目列表 TTL 缓存
//! - `config` - 应用配置读写

pub mod autosave;
pub mod cache;
pub mod config;
pub mod file_guard;
pub mod generation;
pub mod placeholder;
pub mod registry;
pub mod store;
pub mod stream;
pub mod studio;
pub mod substitution;
pub mod workflow;
