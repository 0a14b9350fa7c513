//! 会话监管：外部停止信号
//!
//! 持有 CancellationToken；stop() 后 TurnController 立即结束会话，丢弃未完成的流式快照。

use tokio_util::sync::CancellationToken;

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

    /// 触发停止（Ctrl+C 或调用方主动结束）
    pub fn stop(&self) {
        tracing::info!("Session stop requested");
        self.cancel_token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 单轮使用的子 token：父级停止时一并取消
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
