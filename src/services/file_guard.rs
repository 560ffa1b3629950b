//! # 文件写入守卫服务
//!
//! 统一所有对应用数据文件的写入操作：
//!
//! ## 路径安全验证
//! 写入前验证目标路径位于数据目录之下，防止意外修改数据目录之外的文件。
//!
//! ## 写入前备份
//! 目标文件已存在时，先复制为同目录下的 `<文件名>.bak`，
//! 保留最近一次写入之前的完整内容，供用户在数据损坏时手动恢复。
//!
//! ## 原子替换
//! 内容先写入同目录的 `<文件名>.tmp`，再通过 rename 覆盖目标文件，
//! 写入中途崩溃不会留下半截 JSON。
//!
//! ## 使用方式
//! 项目中所有对数据文件的修改必须通过 `safe_write_file()`。

use std::path::{Path, PathBuf};

/// 安全写入文件（统一入口）
///
/// 执行流程：
/// 1. 验证路径在 `root` 目录下（目录不存在时自动创建）
/// 2. 如果原文件存在，备份为 `<文件名>.bak`
/// 3. 写入临时文件并 rename 覆盖目标文件
///
/// # 参数
/// - `root` - 数据根目录
/// - `file_path` - 目标文件路径，必须位于 `root` 之下
/// - `content` - 要写入的字节内容
///
/// # 错误
/// 路径验证失败、备份失败或写入失败时返回错误
pub async fn safe_write_file(root: &Path, file_path: &Path, content: &[u8]) -> Result<(), String> {
    // 1. 确保父目录存在后再做路径验证（canonicalize 要求路径存在）
    let parent = file_path
        .parent()
        .ok_or_else(|| format!("无效的文件路径: {}", file_path.display()))?;
    if !parent.exists() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("创建数据目录失败: {}", e))?;
    }
    validate_data_path(root, file_path)?;

    // 2. 备份原文件
    if file_path.exists() {
        tokio::fs::copy(file_path, sibling_with_suffix(file_path, "bak"))
            .await
            .map_err(|e| format!("创建备份失败: {}", e))?;
    }

    // 3. 写入临时文件后原子替换
    let temp_path = sibling_with_suffix(file_path, "tmp");
    tokio::fs::write(&temp_path, content)
        .await
        .map_err(|e| format!("写入临时文件失败: {}", e))?;
    tokio::fs::rename(&temp_path, file_path)
        .await
        .map_err(|e| format!("替换数据文件失败: {}", e))
}

/// 验证路径是否在数据根目录下
///
/// 对父目录调用 `canonicalize` 解析符号链接和 `..` 等路径组件
/// （目标文件本身可能尚不存在），确保最终路径确实位于数据目录内。
///
/// # 错误
/// 路径不在数据根目录下时返回安全检查失败错误
pub(crate) fn validate_data_path(root: &Path, file_path: &Path) -> Result<(), String> {
    let root_canonical =
        std::fs::canonicalize(root).map_err(|e| format!("数据目录解析失败: {}", e))?;

    let parent = file_path
        .parent()
        .ok_or_else(|| format!("无效的文件路径: {}", file_path.display()))?;
    let file_name = file_path
        .file_name()
        .ok_or_else(|| format!("无效的文件路径: {}", file_path.display()))?;
    let canonical = std::fs::canonicalize(parent)
        .map_err(|e| format!("路径解析失败: {}", e))?
        .join(file_name);

    if !canonical.starts_with(&root_canonical) {
        return Err(format!(
            "安全检查失败：路径 {} 不在数据目录 {} 下",
            file_path.display(),
            root.display()
        ));
    }

    Ok(())
}

/// 生成同目录下追加后缀的路径，如 `projects.json` → `projects.json.bak`
fn sibling_with_suffix(file_path: &Path, suffix: &str) -> PathBuf {
    let mut name = file_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    file_path.with_file_name(name)
}
