//! 从生成式模型输出中提取 JSON 负载
//!
//! 兼容 ```json ... ``` 代码块、前后夹杂说明文字的纯 JSON（对象或数组）。

use serde::de::DeserializeOwned;

/// 找出输出中的 JSON 片段；找不到返回 None
pub fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();

    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        let body = rest.find("```").map(|end| &rest[..end]).unwrap_or(rest);
        return Some(body.trim());
    }

    let start = trimmed.find(['{', '['])?;
    let closing = if trimmed[start..].starts_with('{') { '}' } else { ']' };
    let end = trimmed.rfind(closing)?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 提取并反序列化；错误信息带上原始片段，便于日志排查
pub fn parse_json<T: DeserializeOwned>(output: &str) -> Result<T, String> {
    let json = extract_json(output).ok_or_else(|| format!("no JSON found in output: {}", preview(output)))?;
    serde_json::from_str(json).map_err(|e| format!("{e}: {}", preview(json)))
}

fn preview(s: &str) -> String {
    s.chars().take(200).collect()
}
