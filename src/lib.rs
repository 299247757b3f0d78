//! autoopt - 评价函数构建与多阶段优化编排
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误、状态投影、会话监管、流水线计划与编排门面
//! - **engine**: 外部设计引擎契约、工作状态句柄、模拟引擎
//! - **merit**: 操作数布局注册表、评价函数构建器、优化向导
//! - **search**: 工具会话状态机、搜索适配器、全局结果收割
//! - **observability**: 日志初始化

pub mod config;
pub mod core;
pub mod engine;
pub mod merit;
pub mod observability;
pub mod search;

pub use crate::core::{OptError, OptimizationOrchestrator, PipelinePlan, PipelineReport};
pub use crate::engine::{DesignEngine, SimulatedEngine, WorkingState};
pub use crate::merit::{MeritFunctionBuilder, WizardConfig, WizardType};
pub use crate::search::{OptimizationRunResult, SaveTopN};
