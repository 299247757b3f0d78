//! 错误类型
//!
//! 致命错误（配置、工具打开失败、索引越界）通过 Err 向上传播；
//! 打开工具之后的运行失败不走 Err，而是记录在 OptimizationRunResult 的 success / error 中。

use thiserror::Error;

use crate::engine::EngineError;

/// 编排层对外暴露的错误
#[derive(Error, Debug)]
pub enum OptError {
    /// 配置或注册表状态不合法（自定义布局槽位冲突、枚举值非法等）
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 打开外部搜索工具失败；不重试
    #[error("External tool unavailable: {0}")]
    ExternalToolUnavailable(String),

    #[error("Operand index {index} out of range (count {count})")]
    IndexOutOfRange { index: usize, count: usize },

    /// 严格模式下的未知命名参数
    #[error("Unknown parameter '{param}' for operand {operand}")]
    UnknownParameter { operand: String, param: String },

    #[error("save_top_n must be one of 1, 5, 10, 20, 50 (got {0})")]
    InvalidSaveTopN(u32),

    #[error("Unknown wizard type: {0}")]
    UnknownWizard(String),

    #[error("Engine error: {0}")]
    Engine(EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<EngineError> for OptError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::ToolUnavailable { .. } => OptError::ExternalToolUnavailable(e.to_string()),
            other => OptError::Engine(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SearchKind;

    #[test]
    fn test_tool_unavailable_maps_to_fatal_variant() {
        let err: OptError = EngineError::ToolUnavailable {
            kind: SearchKind::Global,
            reason: "license busy".to_string(),
        }
        .into();
        assert!(matches!(err, OptError::ExternalToolUnavailable(ref m) if m.contains("global")));

        let err: OptError = EngineError::Call("boom".to_string()).into();
        assert!(matches!(err, OptError::Engine(_)));
    }
}
