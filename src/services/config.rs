//! # 应用配置读写
//!
//! 配置以带缩进的 JSON 存储在数据目录下的 `app-config.json`：
//! - 文件不存在时使用默认配置
//! - 文件损坏或无法读取时记录警告并使用默认配置，不阻止应用启动
//! - 保存经由 `file_guard`，写入前备份旧文件

use std::path::Path;

use crate::models::settings::AppConfig;
use crate::services::file_guard;
use crate::utils::path::CONFIG_FILE_NAME;

/// 读取应用配置
///
/// # 参数
/// - `root` - 数据目录（`~/.mo/PromptStudio/`）
pub async fn load_config(root: &Path) -> AppConfig {
    let config_path = root.join(CONFIG_FILE_NAME);

    if !config_path.exists() {
        log::info!("未找到配置文件，使用默认配置");
        return AppConfig::default();
    }

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(e) => {
            log::warn!("读取配置文件失败，使用默认配置: {}", e);
            return AppConfig::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            log::warn!("解析配置文件失败，使用默认配置: {}", e);
            AppConfig::default()
        }
    }
}

/// 保存应用配置
///
/// # 错误
/// 序列化失败、路径验证失败、备份失败或写入失败时返回错误
pub async fn save_config(root: &Path, config: &AppConfig) -> Result<(), String> {
    let content =
        serde_json::to_string_pretty(config).map_err(|e| format!("序列化配置失败: {}", e))?;

    file_guard::safe_write_file(root, &root.join(CONFIG_FILE_NAME), content.as_bytes()).await
}
