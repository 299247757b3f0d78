//! 会话监管：流水线生命周期与中断
//!
//! 持有 CancellationToken，用户 Ctrl+C 时取消当前流水线：正在运行的工具执行两阶段停止，后续阶段不再启动。

use tokio_util::sync::CancellationToken;

/// 流水线级生命周期管理
#[derive(Debug, Clone)]
pub struct SessionSupervisor {
    /// 用户 Cancel 时触发
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

    /// 触发取消（用户 Ctrl+C）
    pub fn cancel(&self) {
        if !self.cancel_token.is_cancelled() {
            tracing::info!("Cancellation requested");
        }
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 创建子 token（用于单个搜索工具会话）
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
