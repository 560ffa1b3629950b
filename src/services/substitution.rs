//! # 模板替换引擎
//!
//! 按变量声明顺序，将模板中每个 `{variable}` 替换为表单中的值。
//! 纯函数：相同输入永远得到相同输出，不依赖任何隐藏状态或本地化格式。
//!
//! ## 已知限制
//! 替换是逐个变量依次进行的。如果先替换的值中恰好包含后面某个变量的占位符，
//! 这段文本会被再次展开。这是可以接受的行为，不做修正。

use crate::models::project::FormData;
use crate::services::placeholder;

/// 渲染模板
///
/// # 参数
/// - `template` - 模板文本
/// - `available_variables` - 已声明的变量，迭代顺序即替换顺序
/// - `form_data` - 表单值；缺失的变量替换为空字符串
///
/// # 返回值
/// 替换后的文本。未声明的变量即使看起来像占位符也保持原样。
pub fn render(template: &str, available_variables: &[String], form_data: &FormData) -> String {
    available_variables.iter().fold(template.to_string(), |text, variable| {
        let value = form_data.get(variable).map(String::as_str).unwrap_or("");
        placeholder::replace_literal(&text, variable, value)
    })
}
