//! 优化向导：按预设与 WizardConfig 批量生成评价函数
//!
//! 生成顺序固定：DMFS 起始标记 → 高斯求积像质项（视场 × 波长 × 环 × 臂）→ 玻璃厚度边界块
//! → 空气间隔边界块 → 畸变约束 → 轴向色差约束。所有权重乘以 overall_weight。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::OptError;
use crate::engine::SystemSummary;
use crate::merit::quadrature::pupil_points;

/// 向导预设
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardType {
    #[default]
    Default,
    RmsSpot,
    Wavefront,
}

impl WizardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WizardType::Default => "default",
            WizardType::RmsSpot => "rms_spot",
            WizardType::Wavefront => "wavefront",
        }
    }

    /// 求积项使用的操作数类型
    fn quadrature_operand(&self) -> &'static str {
        match self {
            WizardType::Default => "TRAR",
            WizardType::RmsSpot => "TRAC",
            WizardType::Wavefront => "OPDX",
        }
    }
}

impl FromStr for WizardType {
    type Err = OptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(WizardType::Default),
            "rms_spot" => Ok(WizardType::RmsSpot),
            "wavefront" => Ok(WizardType::Wavefront),
            other => Err(OptError::UnknownWizard(other.to_string())),
        }
    }
}

impl fmt::Display for WizardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// [wizard] 段：向导设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WizardConfig {
    /// 生成前是否清空现有评价函数
    pub clear_existing: bool,
    /// 高斯求积环数
    pub ring_count: u8,
    /// 臂数，0 表示自动
    pub arm_count: u8,

    pub enable_transmissive_constraints: bool,
    pub transmissive_min_center: f64,
    pub transmissive_max_center: f64,
    pub transmissive_min_edge: f64,

    pub enable_spacing_constraints: bool,
    pub spacing_min_center: f64,
    pub spacing_max_center: f64,
    pub spacing_min_edge: f64,

    pub enable_distortion_constraint: bool,
    pub distortion_weight: f64,
    pub enable_axial_color_constraint: bool,
    pub axial_color_weight: f64,

    pub overall_weight: f64,
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self {
            clear_existing: true,
            ring_count: 3,
            arm_count: 0,
            enable_transmissive_constraints: true,
            transmissive_min_center: 0.3,
            transmissive_max_center: 1000.0,
            transmissive_min_edge: 0.3,
            enable_spacing_constraints: true,
            spacing_min_center: 0.5,
            spacing_max_center: 1000.0,
            spacing_min_edge: 0.5,
            enable_distortion_constraint: false,
            distortion_weight: 1.0,
            enable_axial_color_constraint: false,
            axial_color_weight: 1.0,
            overall_weight: 1.0,
        }
    }
}

/// 待追加的操作数
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OperandDraft {
    pub type_name: &'static str,
    pub target: f64,
    pub weight: f64,
    pub params: Vec<(&'static str, f64)>,
}

impl OperandDraft {
    fn new(type_name: &'static str, target: f64, weight: f64) -> Self {
        Self {
            type_name,
            target,
            weight,
            params: Vec::new(),
        }
    }

    fn param(mut self, name: &'static str, value: f64) -> Self {
        self.params.push((name, value));
        self
    }
}

/// 生成向导操作数（不含清空动作），结果确定
pub(crate) fn generate(
    wizard: WizardType,
    config: &WizardConfig,
    summary: &SystemSummary,
) -> Vec<OperandDraft> {
    let overall = config.overall_weight;
    let mut drafts = vec![OperandDraft::new("DMFS", 0.0, 0.0)];

    let fields: Vec<(f64, f64)> = if summary.fields.is_empty() {
        vec![(0.0, 0.0)]
    } else {
        summary.fields.clone()
    };
    let waves = summary.wavelength_count.max(1);
    let points = pupil_points(config.ring_count, config.arm_count);
    let operand = wizard.quadrature_operand();

    for &(hx, hy) in &fields {
        for wave in 1..=waves {
            for point in &points {
                drafts.push(
                    OperandDraft::new(operand, 0.0, overall * point.weight)
                        .param("surf", 0.0)
                        .param("wave", f64::from(wave))
                        .param("hx", hx)
                        .param("hy", hy)
                        .param("px", point.px)
                        .param("py", point.py),
                );
            }
        }
    }

    let (first, last) = summary.optical_surfaces();
    let range = |ty: &'static str, target: f64| {
        OperandDraft::new(ty, target, overall)
            .param("surf1", f64::from(first))
            .param("surf2", f64::from(last))
    };

    if config.enable_transmissive_constraints {
        drafts.push(range("MNCG", config.transmissive_min_center));
        drafts.push(range("MXCG", config.transmissive_max_center));
        drafts.push(range("MNEG", config.transmissive_min_edge));
    }
    if config.enable_spacing_constraints {
        drafts.push(range("MNCA", config.spacing_min_center));
        drafts.push(range("MXCA", config.spacing_max_center));
        drafts.push(range("MNEA", config.spacing_min_edge));
    }
    if config.enable_distortion_constraint {
        drafts.push(
            OperandDraft::new("DIST", 0.0, overall * config.distortion_weight)
                .param("surf", 0.0)
                .param("wave", 1.0)
                .param("absolute", 0.0),
        );
    }
    if config.enable_axial_color_constraint {
        drafts.push(
            OperandDraft::new("AXCL", 0.0, overall * config.axial_color_weight)
                .param("wave1", 1.0)
                .param("wave2", f64::from(waves))
                .param("zone", 0.0),
        );
    }
    drafts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> SystemSummary {
        SystemSummary {
            surface_count: 8,
            wavelength_count: 3,
            fields: vec![(0.0, 0.0), (0.0, 0.7), (0.0, 1.0)],
        }
    }

    fn count(drafts: &[OperandDraft], ty: &str) -> usize {
        drafts.iter().filter(|d| d.type_name == ty).count()
    }

    #[test]
    fn test_wizard_type_parse() {
        assert_eq!("rms_spot".parse::<WizardType>().unwrap(), WizardType::RmsSpot);
        assert_eq!("Wavefront".parse::<WizardType>().unwrap(), WizardType::Wavefront);
        assert!(matches!(
            "spot".parse::<WizardType>(),
            Err(OptError::UnknownWizard(_))
        ));
    }

    #[test]
    fn test_default_layout() {
        let drafts = generate(WizardType::RmsSpot, &WizardConfig::default(), &summary());
        assert_eq!(drafts[0].type_name, "DMFS");
        // 3 视场 × 3 波长 × 3 环 × 6 臂
        assert_eq!(count(&drafts, "TRAC"), 162);
        assert_eq!(count(&drafts, "MNCG"), 1);
        assert_eq!(count(&drafts, "MNEA"), 1);
        assert_eq!(count(&drafts, "DIST"), 0);
        assert_eq!(count(&drafts, "AXCL"), 0);
        assert_eq!(drafts.len(), 1 + 162 + 3 + 3);
    }

    #[test]
    fn test_toggles_are_independent() {
        let config = WizardConfig {
            ring_count: 1,
            arm_count: 2,
            enable_transmissive_constraints: false,
            enable_spacing_constraints: true,
            enable_distortion_constraint: true,
            enable_axial_color_constraint: false,
            ..WizardConfig::default()
        };
        let drafts = generate(WizardType::Wavefront, &config, &summary());
        assert_eq!(count(&drafts, "OPDX"), 3 * 3 * 2);
        assert_eq!(count(&drafts, "MNCG"), 0);
        assert_eq!(count(&drafts, "MXCA"), 1);
        assert_eq!(count(&drafts, "DIST"), 1);
        assert_eq!(count(&drafts, "AXCL"), 0);
    }

    #[test]
    fn test_weights_scale_with_overall_weight() {
        let base = WizardConfig {
            enable_distortion_constraint: true,
            distortion_weight: 2.0,
            enable_axial_color_constraint: true,
            axial_color_weight: 0.5,
            ..WizardConfig::default()
        };
        let scaled = WizardConfig {
            overall_weight: 3.0,
            ..base.clone()
        };
        let a = generate(WizardType::Default, &base, &summary());
        let b = generate(WizardType::Default, &scaled, &summary());
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert!((y.weight - 3.0 * x.weight).abs() < 1e-12, "{}", x.type_name);
        }
        let dist = b.iter().find(|d| d.type_name == "DIST").unwrap();
        assert!((dist.weight - 6.0).abs() < 1e-12);
        let quadrature_total: f64 = a
            .iter()
            .filter(|d| d.type_name == "TRAR")
            .map(|d| d.weight)
            .sum();
        // 每个视场 × 波长组合的权重和为 1
        assert!((quadrature_total - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_boundary_block_uses_optical_surface_range() {
        let drafts = generate(WizardType::RmsSpot, &WizardConfig::default(), &summary());
        let mncg = drafts.iter().find(|d| d.type_name == "MNCG").unwrap();
        assert_eq!(mncg.target, 0.3);
        assert_eq!(mncg.params, vec![("surf1", 1.0), ("surf2", 6.0)]);
    }

    #[test]
    fn test_deterministic() {
        let config = WizardConfig::default();
        assert_eq!(
            generate(WizardType::RmsSpot, &config, &summary()),
            generate(WizardType::RmsSpot, &config, &summary())
        );
    }
}
