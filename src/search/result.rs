//! 单次搜索的结果

use std::path::PathBuf;

use serde::Serialize;

use crate::engine::SearchKind;
use crate::search::Candidate;

/// 运行如何结束
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// 工具在协作式超时内自行返回
    Completed,
    /// 调用方取消（Ctrl+C / CancellationToken）
    Cancelled,
    /// 超过 timeout + grace 仍未返回，被强制两阶段停止
    HardTimeout,
}

/// 一次 local / global / hammer 运行的结果
///
/// 超时不是错误：有界运行报告达到的目标值并保持 success = true。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationRunResult {
    pub kind: SearchKind,
    pub success: bool,
    pub initial_objective: f64,
    pub final_objective: Option<f64>,
    /// 仅全局搜索：按排名顺序的有效候选目标值
    pub candidate_objectives: Option<Vec<f64>>,
    /// 引擎报告的循环次数
    pub iterations: Option<u32>,
    /// 仅全局搜索：候选输出目录
    pub results_directory: Option<PathBuf>,
    pub error: Option<String>,
    /// 仅全局搜索：被加载的候选；回退到工作副本时为 None
    pub selected_candidate: Option<Candidate>,
    pub stop_reason: Option<StopReason>,
    pub duration_ms: u64,
}

impl OptimizationRunResult {
    pub fn succeeded(kind: SearchKind, initial_objective: f64) -> Self {
        Self {
            kind,
            success: true,
            initial_objective,
            final_objective: None,
            candidate_objectives: None,
            iterations: None,
            results_directory: None,
            error: None,
            selected_candidate: None,
            stop_reason: None,
            duration_ms: 0,
        }
    }

    pub fn failed(kind: SearchKind, initial_objective: f64, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::succeeded(kind, initial_objective)
        }
    }

    /// initial - final；没有最终值时为 None
    pub fn improvement(&self) -> Option<f64> {
        self.final_objective.map(|f| self.initial_objective - f)
    }

    /// 本次运行之后的目标值（没有最终值时视为未变化）
    pub fn resulting_objective(&self) -> f64 {
        self.final_objective.unwrap_or(self.initial_objective)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_improvement() {
        let mut r = OptimizationRunResult::succeeded(SearchKind::Local, 10.0);
        assert_eq!(r.improvement(), None);
        assert_eq!(r.resulting_objective(), 10.0);
        r.final_objective = Some(7.5);
        assert_eq!(r.improvement(), Some(2.5));
    }

    #[test]
    fn test_failed_carries_error() {
        let r = OptimizationRunResult::failed(SearchKind::Hammer, 3.0, "engine call failed");
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("engine call failed"));
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["kind"], "hammer");
        assert_eq!(json["success"], false);
    }
}
