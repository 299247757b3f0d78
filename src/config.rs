//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `AUTOOPT__*` 覆盖（双下划线表示嵌套，如 `AUTOOPT__OPTIMIZATION__CORES=16`）。

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{OptError, PipelinePlan};
use crate::engine::{Algorithm, Cycles};
use crate::merit::{CustomOperandLayout, OperandSchemaRegistry, ParamPolicy, WizardConfig, WizardType};
use crate::search::{CandidateNaming, SaveTopN};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub engine: EngineSection,
    pub optimization: OptimizationSection,
    pub harvest: HarvestSection,
    pub merit: MeritSection,
    pub wizard: WizardConfig,
}

/// [app] 段：应用名、运行输出根目录
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 每次运行在其下创建带时间戳的子目录
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            output_root: default_output_root(),
        }
    }
}

fn default_output_root() -> PathBuf {
    PathBuf::from("runs")
}

/// [engine] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// 目前只有 simulated；其它值回退到 simulated 并警告
    #[serde(default = "default_backend")]
    pub backend: String,
    /// simulated 后端的初始目标值
    #[serde(default = "default_initial_objective")]
    pub initial_objective: f64,
    /// 启动时加载的设计文件
    pub start_design: Option<PathBuf>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            initial_objective: default_initial_objective(),
            start_design: None,
        }
    }
}

fn default_backend() -> String {
    "simulated".to_string()
}

fn default_initial_objective() -> f64 {
    100.0
}

/// [optimization] 段：核数、算法、各阶段超时与开关
#[derive(Debug, Clone, Deserialize)]
pub struct OptimizationSection {
    #[serde(default = "default_cores")]
    pub cores: u32,
    #[serde(default)]
    pub algorithm: Algorithm,
    #[serde(default)]
    pub cycles: Cycles,
    #[serde(default = "default_local_timeout_secs")]
    pub local_timeout_secs: u64,
    #[serde(default = "default_global_timeout_secs")]
    pub global_timeout_secs: u64,
    #[serde(default = "default_hammer_timeout_secs")]
    pub hammer_timeout_secs: u64,
    /// 硬超时在协作式超时之外的余量
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    #[serde(default = "default_true")]
    pub run_global: bool,
    #[serde(default = "default_true")]
    pub run_hammer: bool,
    /// 某阶段 success = false 时是否终止后续阶段
    #[serde(default = "default_true")]
    pub stop_on_failure: bool,
    /// 每阶段结束后把设计另存到运行目录
    #[serde(default)]
    pub save_snapshots: bool,
}

impl Default for OptimizationSection {
    fn default() -> Self {
        Self {
            cores: default_cores(),
            algorithm: Algorithm::default(),
            cycles: Cycles::default(),
            local_timeout_secs: default_local_timeout_secs(),
            global_timeout_secs: default_global_timeout_secs(),
            hammer_timeout_secs: default_hammer_timeout_secs(),
            grace_secs: default_grace_secs(),
            run_global: true,
            run_hammer: true,
            stop_on_failure: true,
            save_snapshots: false,
        }
    }
}

impl OptimizationSection {
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

fn default_cores() -> u32 {
    8
}

fn default_local_timeout_secs() -> u64 {
    60
}

fn default_global_timeout_secs() -> u64 {
    300
}

fn default_hammer_timeout_secs() -> u64 {
    120
}

fn default_grace_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

/// [harvest] 段：全局搜索候选
#[derive(Debug, Clone, Deserialize)]
pub struct HarvestSection {
    /// 只接受 1 / 5 / 10 / 20 / 50
    #[serde(default)]
    pub save_top_n: SaveTopN,
    #[serde(default = "default_run_id")]
    pub run_id: u32,
    /// 关闭后只检查候选文件是否存在
    #[serde(default = "default_true")]
    pub check_integrity: bool,
    /// 运行目录下的全局搜索输出子目录
    #[serde(default = "default_output_subdir")]
    pub output_subdir: String,
}

impl Default for HarvestSection {
    fn default() -> Self {
        Self {
            save_top_n: SaveTopN::default(),
            run_id: default_run_id(),
            check_integrity: true,
            output_subdir: default_output_subdir(),
        }
    }
}

impl HarvestSection {
    pub fn naming(&self) -> CandidateNaming {
        CandidateNaming::new(self.run_id)
    }
}

fn default_run_id() -> u32 {
    crate::search::DEFAULT_RUN_ID
}

fn default_output_subdir() -> String {
    "global".to_string()
}

/// [merit] 段：参数策略、向导类型、自定义操作数布局
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MeritSection {
    /// true 时未知参数报错，否则警告并丢弃
    #[serde(default)]
    pub strict_params: bool,
    #[serde(default)]
    pub wizard_type: WizardType,
    /// 操作数代码 → { 参数名 = { slot, kind } }
    #[serde(default)]
    pub custom_operands: HashMap<String, CustomOperandLayout>,
}

impl MeritSection {
    pub fn param_policy(&self) -> ParamPolicy {
        if self.strict_params {
            ParamPolicy::Strict
        } else {
            ParamPolicy::Lenient
        }
    }

    /// 内置布局加自定义布局；布局非法时返回 Configuration 错误
    pub fn registry(&self) -> Result<OperandSchemaRegistry, OptError> {
        OperandSchemaRegistry::with_custom(&self.custom_operands)
    }
}

impl AppConfig {
    /// 由 [optimization] 与 [harvest] 得到流水线计划
    pub fn pipeline_plan(&self) -> PipelinePlan {
        let opt = &self.optimization;
        PipelinePlan {
            cores: opt.cores,
            algorithm: opt.algorithm,
            cycles: opt.cycles,
            local_timeout_secs: opt.local_timeout_secs,
            global: opt.run_global.then(|| crate::core::GlobalStage {
                timeout_secs: opt.global_timeout_secs,
                save_top_n: self.harvest.save_top_n,
                output_subdir: self.harvest.output_subdir.clone(),
            }),
            hammer_timeout_secs: opt.run_hammer.then_some(opt.hammer_timeout_secs),
            stop_on_failure: opt.stop_on_failure,
            save_snapshots: opt.save_snapshots,
        }
    }
}

/// 从 config 目录加载配置，环境变量 AUTOOPT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 AUTOOPT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("AUTOOPT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> Result<AppConfig, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.engine.backend, "simulated");
        assert_eq!(cfg.optimization.cores, 8);
        assert_eq!(cfg.harvest.save_top_n, SaveTopN::Ten);
        assert_eq!(cfg.merit.param_policy(), ParamPolicy::Lenient);
        let plan = cfg.pipeline_plan();
        assert!(plan.global.is_some());
        assert_eq!(plan.hammer_timeout_secs, Some(120));
    }

    #[test]
    fn test_sections_from_toml() {
        let cfg = from_toml(
            r#"
            [optimization]
            cores = 4
            algorithm = "orthogonal_descent"
            run_hammer = false

            [harvest]
            save_top_n = 20

            [merit]
            strict_params = true
            wizard_type = "rms_spot"

            [wizard]
            ring_count = 4
            enable_distortion_constraint = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.optimization.cores, 4);
        assert_eq!(cfg.optimization.algorithm, Algorithm::OrthogonalDescent);
        assert_eq!(cfg.optimization.local_timeout_secs, 60);
        assert_eq!(cfg.harvest.save_top_n, SaveTopN::Twenty);
        assert_eq!(cfg.merit.param_policy(), ParamPolicy::Strict);
        assert_eq!(cfg.merit.wizard_type, WizardType::RmsSpot);
        assert_eq!(cfg.wizard.ring_count, 4);
        assert!(cfg.wizard.enable_distortion_constraint);
        assert!(cfg.wizard.clear_existing);
        assert_eq!(cfg.pipeline_plan().hammer_timeout_secs, None);
    }

    #[test]
    fn test_invalid_save_top_n_rejected() {
        let err = from_toml("[harvest]\nsave_top_n = 7\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_custom_operand_layout() {
        let cfg = from_toml(
            r#"
            [merit.custom_operands.zern]
            term = { slot = 2, kind = "integer" }
            coeff = { slot = 3, kind = "real" }
            "#,
        )
        .unwrap();
        let registry = cfg.merit.registry().unwrap();
        assert!(registry.is_registered("ZERN"));
        assert!(registry.resolve("ZERN").slot("term").is_some());
    }

    #[test]
    fn test_custom_operand_duplicate_slot_is_configuration_error() {
        let cfg = from_toml(
            r#"
            [merit.custom_operands.ZERN]
            a = { slot = 2, kind = "integer" }
            b = { slot = 2, kind = "real" }
            "#,
        )
        .unwrap();
        assert!(matches!(cfg.merit.registry(), Err(OptError::Configuration(_))));
    }
}
