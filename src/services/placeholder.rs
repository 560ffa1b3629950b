//! # 占位符编解码
//!
//! 模板中的变量以字面量 `{name}` 的形式出现。本模块负责：
//! - 将变量名包装为占位符
//! - 为变量名构造只匹配 `{name}` 字面量的正则（所有元字符都经过转义）
//! - 在模板中一次性替换某个占位符的全部出现
//! - 扫描模板中出现的所有占位符记号（仅用于提示未声明的变量）
//!
//! 不定义花括号的转义语法：不属于已知变量名的 `{` 原样保留。
//! 由于两侧花括号固定了边界，`foo` 和 `foobar` 这样互为前缀的变量名不会互相误匹配。

use regex::{NoExpand, Regex};

/// 将变量名包装为 `{name}` 占位符
///
/// 变量名本身不做修剪或转换；去除首尾空白后为空时返回 `None`。
pub fn format(name: &str) -> Option<String> {
    if name.trim().is_empty() {
        return None;
    }
    Some(format!("{{{}}}", name))
}

/// 构造只匹配 `{name}` 字面量的正则
///
/// 整个占位符（包括两侧花括号和变量名中的任何字符）都经过 `regex::escape` 转义，
/// 用户输入不会被当作正则语法解释。
///
/// # 错误
/// 只有在变量名极长、编译后的正则超出大小限制时才会失败
pub fn literal_pattern(name: &str) -> Result<Regex, regex::Error> {
    Regex::new(&regex::escape(&format!("{{{}}}", name)))
}

/// 将文本中所有的 `{name}` 替换为 `replacement`
///
/// 一次遍历完成全部替换。`replacement` 按字面量插入，
/// 其中的 `$1`、`${x}` 等不会被当作捕获组引用展开。
pub fn replace_literal(text: &str, name: &str, replacement: &str) -> String {
    match literal_pattern(name) {
        Ok(pattern) => pattern.replace_all(text, NoExpand(replacement)).into_owned(),
        Err(e) => {
            // 正则无法编译时退回到普通子串替换，结果相同
            log::warn!("占位符正则编译失败，改用子串替换: {}", e);
            text.replace(&format!("{{{}}}", name), replacement)
        }
    }
}

/// 扫描模板中出现的占位符记号
///
/// 返回按首次出现顺序去重后的变量名。记号内部不允许再出现花括号，
/// 空白记号（如 `{ }`）会被忽略。这只是平铺的记号扫描，不构造语法树。
pub fn scan_placeholders(template: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find(['{', '}']) {
            Some(idx) if after[idx..].starts_with('}') => {
                let name = &after[..idx];
                if !name.trim().is_empty() && !found.iter().any(|f| f == name) {
                    found.push(name.to_string());
                }
                rest = &after[idx + 1..];
            }
            // 遇到新的 `{`：从它开始重新扫描
            Some(idx) => rest = &after[idx..],
            None => break,
        }
    }

    found
}
