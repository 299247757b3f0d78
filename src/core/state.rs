//! 状态投影：编排器对外发布的轻量状态
//!
//! 内部完整状态由 OptimizationOrchestrator 维护；观察者（CLI 进度、测试）通过 watch 通道只看到 OrchestratorStatus。

use serde::Serialize;

use crate::engine::SearchKind;

/// 编排阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationPhase {
    Idle,
    Evaluating,
    LocalRefinement,
    GlobalSearch,
    HammerRefinement,
    FinalRefinement,
    Completed,
    Failed,
    Cancelled,
}

impl OptimizationPhase {
    /// 阶段对应的外部工具
    pub fn active_tool(&self) -> Option<SearchKind> {
        match self {
            OptimizationPhase::LocalRefinement | OptimizationPhase::FinalRefinement => {
                Some(SearchKind::Local)
            }
            OptimizationPhase::GlobalSearch => Some(SearchKind::Global),
            OptimizationPhase::HammerRefinement => Some(SearchKind::Hammer),
            OptimizationPhase::Evaluating => Some(SearchKind::Local),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OptimizationPhase::Completed | OptimizationPhase::Failed | OptimizationPhase::Cancelled
        )
    }
}

/// 观察者看到的「投影」状态
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OrchestratorStatus {
    pub phase: OptimizationPhase,
    pub active_tool: Option<SearchKind>,
    /// 最近一次得到的目标值
    pub objective: Option<f64>,
    pub completed_stages: usize,
    pub error_message: Option<String>,
}

impl Default for OrchestratorStatus {
    fn default() -> Self {
        Self {
            phase: OptimizationPhase::Idle,
            active_tool: None,
            objective: None,
            completed_stages: 0,
            error_message: None,
        }
    }
}

impl OrchestratorStatus {
    /// 进入新阶段，保留目标值与已完成阶段数
    pub fn enter(&self, phase: OptimizationPhase) -> Self {
        Self {
            phase,
            active_tool: phase.active_tool(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_projects_active_tool() {
        let status = OrchestratorStatus {
            objective: Some(4.0),
            ..OrchestratorStatus::default()
        };
        let next = status.enter(OptimizationPhase::HammerRefinement);
        assert_eq!(next.active_tool, Some(SearchKind::Hammer));
        assert_eq!(next.objective, Some(4.0));
        assert!(!next.phase.is_terminal());
        assert!(next.enter(OptimizationPhase::Cancelled).phase.is_terminal());
        assert_eq!(next.enter(OptimizationPhase::Completed).active_tool, None);
    }
}
