use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([^{}]+)\}").expect("placeholder regex"))
}

/// 模板中的占位符，按首次出现顺序，重复的只保留一个
pub fn placeholders(template: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    placeholder_re()
        .captures_iter(template)
        .map(|c| c[1].trim().to_string())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// 含 `=` 的占位符是内联的字段过滤条件，例如 `{dataset_id=fundamental6,type=MATRIX}`
pub fn is_inline_filter(placeholder: &str) -> bool {
    placeholder.contains('=')
}

/// 一次性替换所有占位符；替换值里的花括号不会被再次展开
pub fn substitute<F>(template: &str, mut lookup: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    placeholder_re()
        .replace_all(template, |c: &regex::Captures| {
            lookup(c[1].trim()).unwrap_or_else(|| c[0].to_string())
        })
        .into_owned()
}

/// 表达式在入队前的基本检查
pub fn validate_expression(expr: &str) -> Result<(), String> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Err("empty".to_string());
    }
    if !paren_balanced(trimmed) {
        return Err(format!("bad_parens: {}", trimmed));
    }
    if placeholder_re().is_match(trimmed) {
        return Err(format!("unresolved_placeholder: {}", trimmed));
    }
    Ok(())
}

fn paren_balanced(s: &str) -> bool {
    let mut depth = 0i32;
    for ch in s.chars() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}
