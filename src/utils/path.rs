//! # 路径工具函数
//!
//! Prompt Studio 的数据独立存储在 `~/.mo/PromptStudio/` 目录下：
//! - `app-config.json` - 应用配置
//! - `projects.json` - 项目数据

use std::path::PathBuf;

/// 应用配置文件名
pub const CONFIG_FILE_NAME: &str = "app-config.json";

/// 获取 Prompt Studio 数据目录的绝对路径
///
/// 使用 `dirs` crate 获取跨平台的主目录路径。
///
/// # 错误
/// 如果无法确定用户主目录（极端情况，如无 HOME 环境变量），返回错误信息。
///
/// # 示例
/// - Windows: `C:\Users\username\.mo\PromptStudio`
/// - Linux/macOS: `/home/username/.mo/PromptStudio`
pub fn get_app_data_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "无法获取用户主目录".to_string())?;
    Ok(app_data_path_in(home))
}

/// 以指定目录作为主目录拼出数据目录
pub fn app_data_path_in(home: impl Into<PathBuf>) -> PathBuf {
    home.into().join(".mo").join("PromptStudio")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_data_path_layout() {
        let path = app_data_path_in("/home/ana");
        assert!(path.ends_with(".mo/PromptStudio"));
        assert_eq!(path.join(CONFIG_FILE_NAME).file_name().unwrap(), "app-config.json");
    }
}
