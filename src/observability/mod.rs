//! 可观测性：日志初始化与可选的事件接收端
//!
//! TraceSink 由调用方注入；缺省时编排行为完全一致，只少了结构化事件。

use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::research::ResearchEvent;

/// 日志：默认 info，可通过 RUST_LOG 覆盖
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}

/// 结构化事件接收端
pub trait TraceSink: Send + Sync {
    fn emit(&self, event: &ResearchEvent);
}

/// 每个事件输出一行 JSON 日志
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn emit(&self, event: &ResearchEvent) {
        let payload = serde_json::to_string(event).unwrap_or_default();
        tracing::info!(event = event.kind(), payload = %payload, "research trace");
    }
}

/// 把事件转发到 channel（前端推送 / 测试断言）；接收端关闭后静默丢弃
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ResearchEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<ResearchEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ResearchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl TraceSink for ChannelSink {
    fn emit(&self, event: &ResearchEvent) {
        let _ = self.tx.send(event.clone());
    }
}

/// 可选 sink 的发射辅助
pub(crate) fn emit(sink: Option<&dyn TraceSink>, event: ResearchEvent) {
    if let Some(sink) = sink {
        sink.emit(&event);
    }
}
