//! # 应用配置数据模型
//!
//! 定义了 Prompt Studio 自身的配置（AppConfig）、用户角色（Role）
//! 和生成服务配置（GenerationConfig）。
//!
//! 配置文件存储在 `~/.mo/PromptStudio/app-config.json`，
//! 对应前端 TypeScript 中的 `AppConfig` 接口。

use serde::{Deserialize, Serialize};

/// 自动保存静默期的默认值（毫秒）
pub const DEFAULT_AUTOSAVE_QUIET_MS: u64 = 1000;

/// 用户角色
///
/// 由外部角色协作方提供。`viewer` 为只读角色：
/// - 看不到模板标签页
/// - 不能增删改变量、编辑模板或删除项目
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Admin,
    Viewer,
}

impl Role {
    /// 是否允许编辑模板和变量、删除项目
    pub fn can_edit(self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// 生成服务配置
///
/// 对应前端 TypeScript 接口：
/// ```typescript
/// interface GenerationConfig {
///   endpoint: string;
///   model: string;
///   apiKeyEnv: string;
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// 流式生成接口地址，响应体为 Server-Sent Events
    pub endpoint: String,

    /// 请求中携带的模型标识
    pub model: String,

    /// 保存 API Key 的环境变量名；密钥本身不写入配置文件
    pub api_key_env: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8787/v1/generate".to_string(),
            model: "default".to_string(),
            api_key_env: "PROMPT_STUDIO_API_KEY".to_string(),
        }
    }
}

/// 应用配置
///
/// 对应前端 TypeScript 接口：
/// ```typescript
/// interface AppConfig {
///   role: 'admin' | 'viewer';
///   autosaveQuietMs: number;
///   generation: GenerationConfig;
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// 当前用户角色
    #[serde(default)]
    pub role: Role,

    /// 模板编辑后自动保存前的静默期（毫秒）
    #[serde(default = "default_autosave_quiet_ms")]
    pub autosave_quiet_ms: u64,

    /// 生成服务配置
    #[serde(default)]
    pub generation: GenerationConfig,
}

fn default_autosave_quiet_ms() -> u64 {
    DEFAULT_AUTOSAVE_QUIET_MS
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            role: Role::default(),
            autosave_quiet_ms: DEFAULT_AUTOSAVE_QUIET_MS,
            generation: GenerationConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_falls_back_to_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"role":"viewer"}"#).unwrap();

        assert_eq!(config.role, Role::Viewer);
        assert_eq!(config.autosave_quiet_ms, DEFAULT_AUTOSAVE_QUIET_MS);
        assert_eq!(config.generation, GenerationConfig::default());
    }
}
