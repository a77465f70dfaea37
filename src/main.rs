//! Forager - 迭代式研究编排引擎
//!
//! 入口：初始化日志、加载配置、构建 Orchestrator 并执行子命令。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use forager::core::{create_orchestrator_builder, ResearchRequest};
use forager::observability::{self, TracingSink};
use forager::storage::{export_report, ExportFormat};
use forager::ResearchReport;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "forager", version, about = "Iterative research orchestration engine")]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long, global = true, env = "FORAGER_CONFIG")]
    config: Option<PathBuf>,

    /// 把研究过程事件输出为 JSON 日志
    #[arg(long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 对一个话题执行研究并输出报告
    Research {
        topic: String,
        #[arg(long)]
        max_loops: Option<u32>,
        /// 写入文件而不是标准输出
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, value_enum)]
        format: Option<Format>,
    },
    /// 按 id 查看已保存的报告
    Show {
        id: Uuid,
        #[arg(long, value_enum, default_value_t = Format::Markdown)]
        format: Format,
    },
    /// 列出最近的报告
    List {
        #[arg(long)]
        topic: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// 绑定诊断：显示每个配置的工具是否可用
    Tools,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Markdown,
}

impl From<Format> for ExportFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Json => ExportFormat::Json,
            Format::Markdown => ExportFormat::Markdown,
        }
    }
}

fn print_report(report: &ResearchReport, format: ExportFormat) -> anyhow::Result<()> {
    println!("{}", format.render(report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let cli = Cli::parse();

    let mut builder = create_orchestrator_builder(cli.config);
    if cli.trace {
        builder = builder.with_sink(Arc::new(TracingSink));
    }
    let orchestrator = Arc::new(builder.build());

    // Ctrl+C：取消进行中的会话，以已收集的来源收尾
    let supervisor = orchestrator.supervisor().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finalizing current session");
            supervisor.cancel();
        }
    });

    match cli.command {
        Commands::Research {
            topic,
            max_loops,
            out,
            format,
        } => {
            let request = ResearchRequest { topic, max_loops };
            let report = orchestrator
                .research(request)
                .await
                .context("research request rejected")?;
            match out {
                Some(path) => {
                    let format = format.map(ExportFormat::from).unwrap_or_else(|| ExportFormat::from_path(&path));
                    export_report(&report, &path, format)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("{} -> {}", report.id, path.display());
                }
                None => print_report(&report, format.map(ExportFormat::from).unwrap_or(ExportFormat::Markdown))?,
            }
        }
        Commands::Show { id, format } => {
            let report = orchestrator
                .fetch_report(id)
                .await
                .context("failed to read report store")?
                .with_context(|| format!("report {id} not found"))?;
            print_report(&report, format.into())?;
        }
        Commands::List {
            topic,
            limit,
            offset,
        } => {
            let reports = orchestrator
                .list_recent(topic.as_deref(), limit, offset)
                .await
                .context("failed to read report store")?;
            if reports.is_empty() {
                println!("No reports.");
            }
            for r in reports {
                println!(
                    "{}  {}  rounds={} sources={}  {}",
                    r.id,
                    r.created_at.format("%Y-%m-%d %H:%M"),
                    r.loop_count,
                    r.sources.len(),
                    r.title
                );
            }
        }
        Commands::Tools => {
            let caps = orchestrator.bindings().await;
            if caps.all().is_empty() {
                println!("No tool endpoints configured.");
            }
            for binding in caps.all() {
                let status = if binding.available { "available" } else { "unavailable" };
                println!(
                    "{:<16} {:<12} timeout={}s {}",
                    binding.name,
                    status,
                    binding.timeout.as_secs(),
                    binding.last_error.as_deref().unwrap_or(&binding.description)
                );
            }
        }
    }

    Ok(())
}
