//! 会话监管：取消令牌与整体会话超时
//!
//! 持有 CancellationToken，外部取消或整体超时时，正在进行的工具调用会被硬取消，
//! Loop Controller 随即以已收集的结果进入 FINALIZING。

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::ResearchError;

/// 会话级生命周期管理：取消令牌
#[derive(Debug, Clone)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 触发取消（调用方放弃请求）
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 为一次研究会话创建守卫：子 token + 截止时间
    pub fn guard(&self, session_timeout: Duration) -> SessionGuard {
        SessionGuard::new(self.cancel_token.child_token(), session_timeout)
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// 单个会话的终止条件：外部取消或截止时间到达，先到者生效
#[derive(Debug, Clone)]
pub struct SessionGuard {
    cancel: CancellationToken,
    deadline: Instant,
}

impl SessionGuard {
    pub fn new(cancel: CancellationToken, session_timeout: Duration) -> Self {
        Self {
            cancel,
            deadline: Instant::now() + session_timeout,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// 已终止时返回原因（SessionTimeout / Cancelled）
    pub fn check(&self) -> Option<ResearchError> {
        if self.cancel.is_cancelled() {
            Some(ResearchError::Cancelled)
        } else if Instant::now() >= self.deadline {
            Some(ResearchError::SessionTimeout)
        } else {
            None
        }
    }

    /// 等待直到会话被取消或超时，返回对应错误
    pub async fn terminated(&self) -> ResearchError {
        tokio::select! {
            _ = self.cancel.cancelled() => ResearchError::Cancelled,
            _ = tokio::time::sleep_until(self.deadline) => ResearchError::SessionTimeout,
        }
    }

    /// 在会话仍存活时运行 future；被取消或超时则丢弃 future（硬取消）并返回错误
    pub async fn run<F: std::future::Future>(&self, fut: F) -> Result<F::Output, ResearchError> {
        if let Some(err) = self.check() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.terminated() => Err(err),
            out = fut => Ok(out),
        }
    }
}
