//! 工具会话：单个外部搜索工具从打开到关闭的状态机
//!
//! Opened → Running → (CancelRequested → Stopped) → Closed。
//! 协作式超时交给引擎（run-for-T），外层再套一个 timeout + grace 的硬超时；
//! 硬超时或调用方取消时执行两阶段停止：cancel，等待确认完成，然后关闭。
//! 关闭时输出一行结构化审计日志（JSON）。

use std::fmt;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::engine::{DesignEngine, EngineError, SearchKind, SearchTool, ToolSettings};
use crate::search::StopReason;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opened,
    Running,
    CancelRequested,
    Stopped,
    Closed,
}

impl SessionState {
    fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Opened, Running)
                | (Opened, Closed)
                | (Running, CancelRequested)
                | (Running, Stopped)
                | (Running, Closed)
                | (CancelRequested, Stopped)
                | (CancelRequested, Closed)
                | (Stopped, CancelRequested)
                | (Stopped, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Opened => "opened",
            SessionState::Running => "running",
            SessionState::CancelRequested => "cancel_requested",
            SessionState::Stopped => "stopped",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// 已打开的搜索工具；同一时刻只存在一个
pub struct ToolSession {
    tool: Box<dyn SearchTool>,
    kind: SearchKind,
    state: SessionState,
    stop_reason: Option<StopReason>,
    failed: bool,
    started: Instant,
}

impl ToolSession {
    /// 打开工具；失败原样返回（调用方视为致命）
    pub async fn open(engine: &dyn DesignEngine, kind: SearchKind) -> Result<Self, EngineError> {
        let tool = engine.open_tool(kind).await?;
        tracing::debug!(kind = %kind, engine = engine.name(), "search tool opened");
        Ok(Self {
            tool,
            kind,
            state: SessionState::Opened,
            stop_reason: None,
            failed: false,
            started: Instant::now(),
        })
    }

    pub fn kind(&self) -> SearchKind {
        self.kind
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn tool(&self) -> &dyn SearchTool {
        self.tool.as_ref()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    fn transition(&mut self, next: SessionState) -> Result<(), EngineError> {
        if !self.state.can_transition_to(next) {
            return Err(EngineError::Call(format!(
                "invalid {} session transition {} -> {}",
                self.kind, self.state, next
            )));
        }
        tracing::debug!(kind = %self.kind, from = %self.state, to = %next, "session transition");
        self.state = next;
        Ok(())
    }

    pub async fn configure(&mut self, settings: &ToolSettings) -> Result<(), EngineError> {
        if self.state != SessionState::Opened {
            return Err(EngineError::Call(format!(
                "{} session cannot be configured in state {}",
                self.kind, self.state
            )));
        }
        let result = self.tool.apply_settings(settings).await;
        self.failed |= result.is_err();
        result
    }

    /// 运行最多 timeout_secs 秒；返回结束原因
    ///
    /// 硬超时或取消时已完成两阶段停止，状态为 Stopped。
    pub async fn run(
        &mut self,
        timeout_secs: u64,
        grace: Duration,
        cancel: &CancellationToken,
    ) -> Result<StopReason, EngineError> {
        self.transition(SessionState::Running)?;
        let hard_limit = Duration::from_secs(timeout_secs) + grace;

        let outcome = tokio::select! {
            r = timeout(hard_limit, self.tool.run_and_wait_with_timeout(timeout_secs)) => match r {
                Ok(Ok(())) => Ok(StopReason::Completed),
                Ok(Err(e)) => Err(e),
                Err(_) => Ok(StopReason::HardTimeout),
            },
            _ = cancel.cancelled() => Ok(StopReason::Cancelled),
        };

        match outcome {
            Ok(StopReason::Completed) => {
                self.stop_reason = Some(StopReason::Completed);
                self.transition(SessionState::Stopped)?;
                Ok(StopReason::Completed)
            }
            Ok(reason) => {
                if reason == StopReason::HardTimeout {
                    tracing::warn!(
                        kind = %self.kind,
                        limit_secs = hard_limit.as_secs_f64(),
                        "Search tool exceeded its hard timeout, forcing stop"
                    );
                } else {
                    tracing::info!(kind = %self.kind, "Search run cancelled by caller");
                }
                self.stop_reason = Some(reason);
                self.stop(grace).await?;
                Ok(reason)
            }
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    /// 两阶段停止：cancel，然后在 grace 内等待工具确认完成
    pub async fn stop(&mut self, grace: Duration) -> Result<(), EngineError> {
        self.transition(SessionState::CancelRequested)?;
        if let Err(e) = self.tool.cancel().await {
            self.failed = true;
            return Err(e);
        }
        match timeout(grace, self.tool.wait_for_completion()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.failed = true;
                return Err(e);
            }
            Err(_) => tracing::warn!(
                kind = %self.kind,
                "Search tool did not acknowledge cancellation within {:?}",
                grace
            ),
        }
        self.transition(SessionState::Stopped)
    }

    /// 关闭工具并输出审计日志；会话随之消费
    pub async fn close(mut self) -> Result<(), EngineError> {
        let from = self.state;
        let result = self.tool.close().await;
        self.state = SessionState::Closed;

        let outcome = match (&result, self.failed, self.stop_reason) {
            (Err(_), _, _) => "close_failed",
            (_, true, _) => "error",
            (_, _, Some(StopReason::HardTimeout)) => "hard_timeout",
            (_, _, Some(StopReason::Cancelled)) => "cancelled",
            (_, _, Some(StopReason::Completed)) => "completed",
            (_, _, None) => "not_run",
        };
        let audit = serde_json::json!({
            "event": "search_audit",
            "kind": self.kind.as_str(),
            "ok": result.is_ok() && !self.failed,
            "outcome": outcome,
            "closed_from": from.to_string(),
            "duration_ms": self.started.elapsed().as_millis() as u64,
        });
        tracing::info!(audit = %audit.to_string(), "search");
        result
    }
}
