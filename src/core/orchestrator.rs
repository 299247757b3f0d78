//! 优化编排器：对外门面
//!
//! 持有唯一的 WorkingState 与 MeritFunctionBuilder，按 local → global? → hammer? → local 串行执行；
//! 同一时刻只打开一个外部工具。每次评估与运行前把评价函数同步到引擎。
//! 阶段变化通过 watch 通道发布 OrchestratorStatus。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::config::AppConfig;
use crate::core::{
    OptError, OptimizationPhase, OrchestratorStatus, PipelinePlan, PipelineReport,
    SessionSupervisor, Stage, StageRecord,
};
use crate::engine::{DesignEngine, SimulatedEngine, WorkingState};
use crate::merit::{MeritFunctionBuilder, WizardConfig, WizardType};
use crate::search::{
    CandidateNaming, GlobalResultHarvester, GlobalRunOptions, HammerRunOptions, LocalRunOptions,
    OptimizationRunResult, SearchToolAdapter, DEFAULT_GRACE,
};

/// 根据配置选择引擎后端；未知后端回退到模拟引擎
pub fn create_engine_from_config(cfg: &AppConfig) -> Arc<dyn DesignEngine> {
    match cfg.engine.backend.to_lowercase().as_str() {
        "simulated" => {
            tracing::info!(
                initial_objective = cfg.engine.initial_objective,
                "Using simulated design engine"
            );
        }
        other => {
            tracing::warn!("Engine backend '{}' is not available, using simulated engine", other);
        }
    }
    Arc::new(
        SimulatedEngine::new(cfg.engine.initial_objective).with_naming(cfg.harvest.naming()),
    )
}

/// 多阶段优化门面
pub struct OptimizationOrchestrator {
    state: WorkingState,
    builder: MeritFunctionBuilder,
    supervisor: SessionSupervisor,
    grace: Duration,
    naming: CandidateNaming,
    check_integrity: bool,
    run_dir: PathBuf,
    status_tx: watch::Sender<OrchestratorStatus>,
}

impl OptimizationOrchestrator {
    pub fn new(
        engine: Arc<dyn DesignEngine>,
        builder: MeritFunctionBuilder,
        run_dir: impl Into<PathBuf>,
    ) -> Self {
        let (status_tx, _) = watch::channel(OrchestratorStatus::default());
        Self {
            state: WorkingState::new(engine),
            builder,
            supervisor: SessionSupervisor::new(),
            grace: DEFAULT_GRACE,
            naming: CandidateNaming::default(),
            check_integrity: true,
            run_dir: run_dir.into(),
            status_tx,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_naming(mut self, naming: CandidateNaming) -> Self {
        self.naming = naming;
        self
    }

    pub fn with_integrity_check(mut self, enabled: bool) -> Self {
        self.check_integrity = enabled;
        self
    }

    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }

    pub fn subscribe(&self) -> watch::Receiver<OrchestratorStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> OrchestratorStatus {
        self.status_tx.borrow().clone()
    }

    pub fn working_state(&self) -> &WorkingState {
        &self.state
    }

    pub fn merit_builder(&self) -> &MeritFunctionBuilder {
        &self.builder
    }

    pub fn merit_builder_mut(&mut self) -> &mut MeritFunctionBuilder {
        &mut self.builder
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    fn engine(&self) -> &dyn DesignEngine {
        self.state.engine().as_ref()
    }

    fn adapter(&self) -> SearchToolAdapter {
        SearchToolAdapter::new(self.grace, self.supervisor.child_token())
    }

    fn publish(&self, phase: OptimizationPhase) {
        self.status_tx
            .send_modify(|status| *status = status.enter(phase));
    }

    fn record(&self, objective: Option<f64>, error: Option<String>) {
        self.status_tx.send_modify(|status| {
            if objective.is_some() {
                status.objective = objective;
            }
            status.completed_stages += 1;
            status.error_message = error;
        });
    }

    /// 加载起始设计文件
    pub async fn load_design(&mut self, path: &Path) -> Result<(), OptError> {
        self.state.load(path).await?;
        tracing::info!(path = %path.display(), "Design loaded");
        Ok(())
    }

    /// 按引擎的系统概况生成向导评价函数，并同步到引擎
    pub async fn apply_wizard(
        &mut self,
        wizard_type: WizardType,
        config: &WizardConfig,
    ) -> Result<usize, OptError> {
        let summary = self.engine().system_summary().await?;
        let added = self.builder.apply_wizard(wizard_type, config, &summary)?;
        self.builder.sync(self.state.engine().as_ref()).await?;
        Ok(added)
    }

    /// 只读评估当前目标值
    pub async fn evaluate(&self) -> Result<f64, OptError> {
        self.builder.get_objective_value(self.engine()).await
    }

    /// 重算并回填每个操作数的当前值
    pub async fn update_values(&mut self) -> Result<(), OptError> {
        let engine = self.state.engine().clone();
        self.builder.update_values(engine.as_ref()).await
    }

    pub async fn run_local(
        &self,
        options: &LocalRunOptions,
    ) -> Result<OptimizationRunResult, OptError> {
        self.builder.sync(self.engine()).await?;
        self.adapter().run_local(&self.state, options).await
    }

    /// 全局搜索并收割最佳候选；可能替换工作状态
    pub async fn run_global(
        &mut self,
        options: &GlobalRunOptions,
    ) -> Result<OptimizationRunResult, OptError> {
        self.builder.sync(self.engine()).await?;
        let harvester = GlobalResultHarvester::new(self.adapter())
            .with_naming(self.naming.clone())
            .with_integrity_check(self.check_integrity);
        let before = self.state.generation();
        let result = harvester.run(&mut self.state, options).await?;
        if self.state.generation() != before {
            tracing::debug!(
                source = ?self.state.source(),
                "Working state rebound after global search"
            );
        }
        Ok(result)
    }

    pub async fn run_hammer(
        &self,
        options: &HammerRunOptions,
    ) -> Result<OptimizationRunResult, OptError> {
        self.builder.sync(self.engine()).await?;
        self.adapter().run_hammer(&self.state, options).await
    }

    /// 执行完整流水线；致命错误（打开工具失败等）直接返回 Err
    pub async fn run_pipeline(&mut self, plan: &PipelinePlan) -> Result<PipelineReport, OptError> {
        self.publish(OptimizationPhase::Evaluating);
        let initial = match self.evaluate().await {
            Ok(v) => v,
            Err(e) => {
                self.fail(&e);
                return Err(e);
            }
        };
        let mut report = PipelineReport::new(self.engine().name(), &self.run_dir, initial);
        tracing::info!(
            stages = ?plan.stage_names(),
            initial_objective = initial,
            operands = self.builder.get_operand_count(),
            "Starting optimization pipeline"
        );

        let local = LocalRunOptions::new(plan.cores, plan.local_timeout_secs)
            .with_algorithm(plan.algorithm)
            .with_cycles(plan.cycles);

        let stages = plan.stages();
        for (index, stage) in stages.iter().enumerate() {
            if self.supervisor.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let name = stage.name();
            let outcome = match stage {
                Stage::Local => {
                    self.publish(OptimizationPhase::LocalRefinement);
                    self.run_local(&local).await
                }
                Stage::Global(global) => {
                    self.publish(OptimizationPhase::GlobalSearch);
                    let options = GlobalRunOptions::new(
                        self.run_dir.join(&global.output_subdir),
                        global.timeout_secs,
                        plan.cores,
                    )
                    .with_save_top_n(global.save_top_n);
                    self.run_global(&options).await
                }
                Stage::Hammer(timeout_secs) => {
                    self.publish(OptimizationPhase::HammerRefinement);
                    self.run_hammer(&HammerRunOptions::new(plan.cores, *timeout_secs))
                        .await
                }
                Stage::FinalLocal => {
                    self.publish(OptimizationPhase::FinalRefinement);
                    self.run_local(&local).await
                }
            };

            let result = match outcome {
                Ok(r) => r,
                Err(e) => {
                    self.fail(&e);
                    return Err(e);
                }
            };
            let snapshot = if plan.save_snapshots {
                self.save_snapshot(index, name).await
            } else {
                None
            };

            tracing::info!(
                stage = name,
                success = result.success,
                initial = result.initial_objective,
                final_objective = ?result.final_objective,
                "Stage finished"
            );
            self.record(result.final_objective, result.error.clone());
            let failed = !result.success;
            report.stages.push(StageRecord {
                stage: name.to_string(),
                result,
                snapshot,
            });

            if failed && plan.stop_on_failure {
                tracing::warn!(stage = name, "Stage failed, stopping pipeline");
                report.stopped_after = Some(name.to_string());
                break;
            }
        }

        if self.supervisor.is_cancelled() {
            report.cancelled = true;
        }
        report.completed = !report.cancelled
            && report.stopped_after.is_none()
            && report.stages.len() == stages.len();

        let final_objective = match self.evaluate().await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("Final evaluation failed: {}", e);
                None
            }
        };
        report.finish(final_objective);

        let phase = if report.cancelled {
            OptimizationPhase::Cancelled
        } else if report.stopped_after.is_some() {
            OptimizationPhase::Failed
        } else {
            OptimizationPhase::Completed
        };
        self.publish(phase);
        if let Some(v) = final_objective {
            self.status_tx.send_modify(|status| status.objective = Some(v));
        }
        tracing::info!(
            initial_objective = report.initial_objective,
            final_objective = ?report.final_objective,
            improvement = ?report.improvement(),
            phase = ?phase,
            "Optimization pipeline finished"
        );
        Ok(report)
    }

    fn fail(&self, error: &OptError) {
        tracing::error!("Optimization pipeline aborted: {}", error);
        self.status_tx.send_modify(|status| {
            *status = status.enter(OptimizationPhase::Failed);
            status.error_message = Some(error.to_string());
        });
    }

    /// 阶段快照；失败只记录警告
    async fn save_snapshot(&self, index: usize, stage: &str) -> Option<PathBuf> {
        let dir = self.run_dir.join("snapshots");
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!("Cannot create snapshot directory {}: {}", dir.display(), e);
            return None;
        }
        let path = dir.join(format!("{:02}_{}.zos", index + 1, stage));
        match self.state.save(&path).await {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!("Snapshot after {} failed: {}", stage, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SearchKind;
    use crate::search::SaveTopN;

    fn orchestrator(engine: &SimulatedEngine, dir: &Path) -> OptimizationOrchestrator {
        OptimizationOrchestrator::new(
            Arc::new(engine.clone()),
            MeritFunctionBuilder::default(),
            dir,
        )
        .with_grace(Duration::from_millis(50))
    }

    fn quick_plan() -> PipelinePlan {
        PipelinePlan {
            cores: 2,
            local_timeout_secs: 1,
            global: Some(crate::core::GlobalStage {
                timeout_secs: 1,
                save_top_n: SaveTopN::Five,
                output_subdir: "global".to_string(),
            }),
            hammer_timeout_secs: Some(1),
            ..PipelinePlan::default()
        }
    }

    #[tokio::test]
    async fn test_full_pipeline_improves_objective() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimulatedEngine::new(100.0).with_ranked_objectives(vec![70.0, 50.0, 60.0]);
        let mut orch = orchestrator(&engine, dir.path());
        orch.apply_wizard(WizardType::RmsSpot, &WizardConfig::default())
            .await
            .unwrap();

        let report = orch.run_pipeline(&quick_plan()).await.unwrap();

        assert!(report.completed);
        assert_eq!(report.stages.len(), 4);
        assert_eq!(report.initial_objective, 100.0);
        let global = &report.stage("global").unwrap().result;
        assert_eq!(global.final_objective, Some(50.0));
        // 50 × 0.95（hammer）× 0.8（final local）
        let expected = 50.0 * 0.95 * 0.8;
        assert!((report.final_objective.unwrap() - expected).abs() < 1e-9);
        assert_eq!(orch.status().phase, OptimizationPhase::Completed);
        assert_eq!(orch.status().completed_stages, 4);
        assert_eq!(
            orch.working_state().source(),
            Some(dir.path().join("global").join("GLOBAL_0001_002.zos").as_path())
        );
    }

    #[tokio::test]
    async fn test_global_stage_honors_configured_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.harvest.run_id = 2;
        let engine = SimulatedEngine::new(20.0)
            .with_ranked_objectives(vec![12.4, 9.8, 15.0])
            .with_naming(cfg.harvest.naming());
        let mut orch = orchestrator(&engine, dir.path()).with_naming(cfg.harvest.naming());

        let options = GlobalRunOptions::new(dir.path().join("global"), 1, 2)
            .with_save_top_n(SaveTopN::Five);
        let result = orch.run_global(&options).await.unwrap();

        assert_eq!(result.final_objective, Some(9.8));
        assert_eq!(result.selected_candidate.map(|c| c.rank), Some(2));
        assert_eq!(engine.objective(), 9.8);
        assert_eq!(
            orch.working_state().source(),
            Some(dir.path().join("global").join("GLOBAL_0002_002.zos").as_path())
        );
    }

    #[tokio::test]
    async fn test_merit_function_synced_before_runs() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimulatedEngine::new(10.0);
        let mut orch = orchestrator(&engine, dir.path());
        orch.merit_builder_mut()
            .add_operand("EFFL", 50.0, 1.0, &[("wave", 2.0)])
            .unwrap();
        orch.run_local(&LocalRunOptions::new(1, 1)).await.unwrap();
        assert_eq!(engine.operand_count(), 2);
    }

    #[tokio::test]
    async fn test_stop_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimulatedEngine::new(10.0).with_failing_run(SearchKind::Local);
        let mut orch = orchestrator(&engine, dir.path());
        let report = orch.run_pipeline(&quick_plan()).await.unwrap();
        assert_eq!(report.stages.len(), 1);
        assert_eq!(report.stopped_after.as_deref(), Some("local"));
        assert!(!report.completed);
        assert_eq!(orch.status().phase, OptimizationPhase::Failed);
    }

    #[tokio::test]
    async fn test_continue_after_failure_when_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimulatedEngine::new(10.0).with_failing_run(SearchKind::Hammer);
        let mut orch = orchestrator(&engine, dir.path());
        let plan = PipelinePlan {
            global: None,
            stop_on_failure: false,
            ..quick_plan()
        };
        let report = orch.run_pipeline(&plan).await.unwrap();
        assert_eq!(report.stages.len(), 3);
        assert!(!report.stage("hammer").unwrap().result.success);
        assert!(report.completed);
    }

    #[tokio::test]
    async fn test_unavailable_tool_aborts_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimulatedEngine::new(10.0).with_unavailable(SearchKind::Hammer);
        let mut orch = orchestrator(&engine, dir.path());
        let err = orch.run_pipeline(&quick_plan()).await.unwrap_err();
        assert!(matches!(err, OptError::ExternalToolUnavailable(_)));
        assert_eq!(orch.status().phase, OptimizationPhase::Failed);
        assert!(orch.status().error_message.is_some());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_no_stage() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimulatedEngine::new(10.0);
        let mut orch = orchestrator(&engine, dir.path());
        orch.supervisor().cancel();
        let report = orch.run_pipeline(&quick_plan()).await.unwrap();
        assert!(report.cancelled);
        assert!(report.stages.is_empty());
        assert_eq!(orch.status().phase, OptimizationPhase::Cancelled);
    }

    #[tokio::test]
    async fn test_snapshots_written_per_stage() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimulatedEngine::new(10.0);
        let mut orch = orchestrator(&engine, dir.path());
        let plan = PipelinePlan {
            global: None,
            hammer_timeout_secs: None,
            save_snapshots: true,
            ..quick_plan()
        };
        let report = orch.run_pipeline(&plan).await.unwrap();
        let snapshot = report.stages[1].snapshot.clone().unwrap();
        assert!(snapshot.ends_with("02_final_local.zos"));
        assert!(snapshot.exists());
    }

    #[tokio::test]
    async fn test_update_values_through_facade() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimulatedEngine::new(10.0);
        let mut orch = orchestrator(&engine, dir.path());
        orch.merit_builder_mut()
            .add_operand("TOTR", 100.0, 1.0, &[])
            .unwrap();
        orch.update_values().await.unwrap();
        let rows = orch.merit_builder().list_operands();
        assert_eq!(rows[1].value, Some(101.0));
    }
}
