//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 按顺序返回预置的脚本响应；脚本耗尽后返回错误（或 `always` 设置的固定响应），
//! 离线运行时会让规划 / 反思 / 合成走启发式回退。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, Message};

#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, String>>>,
    always: Option<String>,
    calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 依次返回给定响应
    pub fn scripted<I>(responses: I) -> Self
    where
        I: IntoIterator<Item = Result<String, String>>,
    {
        Self {
            script: Mutex::new(responses.into_iter().collect()),
            ..Self::default()
        }
    }

    /// 脚本耗尽后总是返回同一响应
    pub fn always(response: impl Into<String>) -> Self {
        Self {
            always: Some(response.into()),
            ..Self::default()
        }
    }

    pub fn push(&self, response: Result<String, String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(response);
        }
    }

    /// 已被调用次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .map_err(|_| "mock script poisoned".to_string())?
            .pop_front();
        match next {
            Some(response) => response,
            None => self
                .always
                .clone()
                .ok_or_else(|| "mock script exhausted".to_string()),
        }
    }
}
