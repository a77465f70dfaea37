//! LLM 客户端抽象
//!
//! 规划、反思、合成都把生成式模型当作不透明的决策预言机：给定消息，返回文本或错误。
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient。

use async_trait::async_trait;

use crate::llm::Message;

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;
}
