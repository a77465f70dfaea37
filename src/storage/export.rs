//! 报告导出：写入 JSON 或 Markdown 文件

use std::path::Path;
use std::str::FromStr;

use crate::research::ResearchReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Json,
    Markdown,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "markdown" | "md" => Ok(Self::Markdown),
            other => Err(format!("unknown export format: {other}")),
        }
    }
}

impl ExportFormat {
    /// 根据文件扩展名推断，未知时为 JSON
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("md") | Some("markdown") => Self::Markdown,
            _ => Self::Json,
        }
    }

    pub fn render(self, report: &ResearchReport) -> anyhow::Result<String> {
        Ok(match self {
            Self::Json => serde_json::to_string_pretty(report)?,
            Self::Markdown => report.to_markdown(),
        })
    }
}

/// 写入文件；父目录不存在时自动创建
pub fn export_report(
    report: &ResearchReport,
    path: impl AsRef<Path>,
    format: ExportFormat,
) -> anyhow::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format.render(report)?)?;
    Ok(())
}
