//! autoopt - 评价函数构建与多阶段优化
//!
//! 入口：加载配置、初始化日志、生成向导评价函数，按流水线计划运行并写出报告。
//! 用法：`autoopt [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use autoopt::config::{load_config, AppConfig};
use autoopt::core::{create_engine_from_config, OptimizationOrchestrator};
use autoopt::merit::MeritFunctionBuilder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    autoopt::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    // 每次运行一个带时间戳的目录
    let run_dir = cfg
        .app
        .output_root
        .join(chrono::Local::now().format("%Y%m%d-%H%M%S").to_string());
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("Failed to create run directory {}", run_dir.display()))?;

    let engine = create_engine_from_config(&cfg);
    let registry = cfg
        .merit
        .registry()
        .context("Invalid custom operand layout")?;
    let builder = MeritFunctionBuilder::new(registry).with_policy(cfg.merit.param_policy());

    let mut orchestrator = OptimizationOrchestrator::new(Arc::clone(&engine), builder, &run_dir)
        .with_grace(cfg.optimization.grace())
        .with_naming(cfg.harvest.naming())
        .with_integrity_check(cfg.harvest.check_integrity);

    if let Some(ref design) = cfg.engine.start_design {
        orchestrator
            .load_design(design)
            .await
            .with_context(|| format!("Failed to load start design {}", design.display()))?;
    }

    let added = orchestrator
        .apply_wizard(cfg.merit.wizard_type, &cfg.wizard)
        .await
        .context("Failed to build merit function")?;
    tracing::info!(
        wizard = %cfg.merit.wizard_type,
        added,
        total = orchestrator.merit_builder().get_operand_count(),
        "Merit function ready"
    );

    // Ctrl+C：取消当前流水线，正在运行的工具执行两阶段停止
    let supervisor = orchestrator.supervisor().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            supervisor.cancel();
        }
    });

    let plan = cfg.pipeline_plan();
    let report = orchestrator
        .run_pipeline(&plan)
        .await
        .context("Optimization pipeline failed")?;

    let report_path = run_dir.join("pipeline_report.json");
    report
        .write_json(&report_path)
        .context("Failed to write pipeline report")?;

    println!(
        "initial {:.6} -> final {} ({} stages, report: {})",
        report.initial_objective,
        report
            .final_objective
            .map(|v| format!("{:.6}", v))
            .unwrap_or_else(|| "n/a".to_string()),
        report.stages.len(),
        report_path.display()
    );
    Ok(())
}
