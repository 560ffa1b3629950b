//! # 变量注册表
//!
//! 维护项目已声明的变量列表，并保证模板文本、变量列表、表单数据三者一致。
//!
//! 所有操作都接收当前项目快照、返回新的项目快照，不就地修改输入：
//! - `add` - 追加变量并为其预置空表单值
//! - `delete` - 移除变量、表单值，并清空模板中该变量的全部占位符
//! - `rename` - 原位替换变量名、迁移表单值，并改写模板中的全部占位符
//!
//! 对空白名或重复名，这三个操作都是静默的空操作。
//! 需要给用户提示的调用方先用 `validate_name` 校验。

use crate::error::{WorkflowError, WorkflowResult};
use crate::models::project::Project;
use crate::services::placeholder;

/// 添加变量
///
/// 变量名去除首尾空白后为空，或已经存在时，原样返回项目。
pub fn add(project: &Project, name: &str) -> Project {
    let name = name.trim();
    let mut next = project.clone();
    if name.is_empty() || project.has_variable(name) {
        return next;
    }

    next.available_variables.push(name.to_string());
    next.form_data.insert(name.to_string(), String::new());
    next
}

/// 删除变量
///
/// 从变量列表和表单数据中移除该变量，
/// 并把模板中每一处 `{name}` 替换为空字符串。
pub fn delete(project: &Project, name: &str) -> Project {
    let mut next = project.clone();
    next.available_variables.retain(|v| v != name);
    next.form_data.remove(name);
    next.template = placeholder::replace_literal(&project.template, name, "");
    next
}

/// 重命名变量
///
/// 以下情况原样返回项目：
/// - 新名称去除首尾空白后为空
/// - 新名称已被另一个变量使用
/// - 旧名称不存在
///
/// 否则在原位置替换变量名（其余变量顺序不变），
/// 迁移表单值，并把模板中每一处 `{old}` 改写为 `{new}`。
pub fn rename(project: &Project, old_name: &str, new_name: &str) -> Project {
    let new_name = new_name.trim();
    let mut next = project.clone();

    if new_name.is_empty() || new_name == old_name {
        return next;
    }
    if project.has_variable(new_name) {
        return next;
    }
    let Some(position) = project.available_variables.iter().position(|v| v == old_name) else {
        return next;
    };

    next.available_variables[position] = new_name.to_string();

    let value = next.form_data.remove(old_name).unwrap_or_default();
    next.form_data.insert(new_name.to_string(), value);

    // format 只在名称为空白时返回 None，上面已经排除
    let replacement = placeholder::format(new_name).unwrap_or_default();
    next.template = placeholder::replace_literal(&project.template, old_name, &replacement);
    next
}

/// 校验新增或重命名时输入的变量名
///
/// # 参数
/// - `project` - 当前项目
/// - `name` - 用户输入的变量名
/// - `renaming_from` - 重命名时的旧名称；新增时为 `None`
///
/// # 返回值
/// 校验通过时返回去除首尾空白后的变量名
///
/// # 错误
/// 名称为空白，或与另一个已存在的变量重名时返回 `Validation` 错误
pub fn validate_name(
    project: &Project,
    name: &str,
    renaming_from: Option<&str>,
) -> WorkflowResult<String> {
    let field = if renaming_from.is_some() { "newName" } else { "name" };
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(WorkflowError::validation(field, "变量名不能为空"));
    }
    if project.has_variable(trimmed) && renaming_from != Some(trimmed) {
        return Err(WorkflowError::validation(
            field,
            format!("变量 \"{}\" 已存在", trimmed),
        ));
    }
    if let Some(old) = renaming_from {
        if !project.has_variable(old) {
            return Err(WorkflowError::validation(
                "oldName",
                format!("变量 \"{}\" 不存在", old),
            ));
        }
    }

    Ok(trimmed.to_string())
}
