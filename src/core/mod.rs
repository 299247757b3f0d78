//! 核心编排层：错误、状态投影、会话监管、流水线计划与主控门面

pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod session_supervisor;
pub mod state;

pub use error::OptError;
pub use orchestrator::{create_engine_from_config, OptimizationOrchestrator};
pub use pipeline::{GlobalStage, PipelinePlan, PipelineReport, Stage, StageRecord};
pub use session_supervisor::SessionSupervisor;
pub use state::{OptimizationPhase, OrchestratorStatus};
