//! 搜索层：工具会话、三种搜索的适配器、全局结果收割

pub mod adapter;
pub mod candidate;
pub mod harvester;
pub mod result;
pub mod session;

pub use adapter::{
    GlobalSearchRun, HammerRunOptions, LocalRunOptions, SearchToolAdapter, DEFAULT_GRACE,
};
pub use candidate::{
    is_populated, select_best, verify_integrity, Candidate, CandidateNaming, SaveTopN,
    CANDIDATE_EXTENSION, CANDIDATE_PREFIX, DEFAULT_RUN_ID, UNUSED_SLOT_CEILING, WORKING_COPY_NAME,
};
pub use harvester::{CandidateConsistencyFault, GlobalResultHarvester, GlobalRunOptions, HarvestPhase};
pub use result::{OptimizationRunResult, StopReason};
pub use session::{SessionState, ToolSession};
