//! 来源可信度：按域名的粗略启发式评分，用于格式化来源列表

use reqwest::Url;

/// 可信度等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Credibility {
    Low,
    Medium,
    High,
}

impl Credibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Credibility::High => "high",
            Credibility::Medium => "medium",
            Credibility::Low => "low",
        }
    }
}

/// 0-1 的信任分；非 URL 引用（DOI、内部 id 等）给中性分
pub fn trust_score(reference: &str, trusted_domains: &[String]) -> f32 {
    let host = match Url::parse(reference.trim()) {
        Ok(url) => match url.host_str() {
            Some(h) => h.trim_start_matches("www.").to_lowercase(),
            None => return 0.5,
        },
        Err(_) => return 0.5,
    };

    if trusted_domains
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{d}")))
    {
        return 0.9;
    }
    if host.ends_with(".edu") || host.ends_with(".gov") || host.contains(".ac.") {
        return 0.85;
    }
    if host.ends_with("wikipedia.org") || host == "arxiv.org" {
        return 0.8;
    }
    if host == "github.com" || host == "stackoverflow.com" || host == "docs.rs" {
        return 0.75;
    }
    0.5
}

pub fn credibility(reference: &str, trusted_domains: &[String]) -> Credibility {
    let score = trust_score(reference, trusted_domains);
    if score >= 0.8 {
        Credibility::High
    } else if score >= 0.6 {
        Credibility::Medium
    } else {
        Credibility::Low
    }
}
