//! 外部设计引擎边界：工具契约、工作状态句柄与进程内模拟实现

pub mod simulated;
pub mod traits;
pub mod working_state;

pub use simulated::SimulatedEngine;
pub use traits::{
    Algorithm, Cycles, DesignEngine, EngineError, SearchKind, SearchTool, SystemSummary,
    ToolSettings,
};
pub use working_state::WorkingState;
