//! 操作数参数槽映射
//!
//! 每种操作数类型有自己的参数布局（参数名 → 单元格索引 + 值类型）。内置类型用 OperandType 枚举表示，
//! 未登记的类型落到 DEFAULT 布局；配置中可追加自定义布局，构建注册表时校验。

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::OptError;

/// 控制操作数类型名（评价函数第 0 位的结构标记）
pub const CONTROL_TYPE: &str = "CONF";
/// 回退布局名
pub const DEFAULT_SPEC_NAME: &str = "DEFAULT";
/// 可用单元格索引范围（1 号单元格为类型本身）
pub const MIN_SLOT_INDEX: u8 = 2;
pub const MAX_SLOT_INDEX: u8 = 12;

/// 单元格值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    Integer,
    Real,
}

/// 单元格中存储的值
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SlotValue {
    Integer(i64),
    Real(f64),
}

impl SlotValue {
    /// 按槽位类型转换：Integer 向零截断，Real 保留全部精度
    pub fn coerce(kind: SlotKind, value: f64) -> Self {
        match kind {
            SlotKind::Integer => SlotValue::Integer(value.trunc() as i64),
            SlotKind::Real => SlotValue::Real(value),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            SlotValue::Integer(v) => v as f64,
            SlotValue::Real(v) => v,
        }
    }
}

/// 参数对应的单元格
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub index: u8,
    pub kind: SlotKind,
}

type Layout = &'static [(&'static str, u8, SlotKind)];

const DEFAULT_LAYOUT: Layout = &[
    ("wave", 4, SlotKind::Integer),
    ("field", 3, SlotKind::Integer),
    ("samp", 7, SlotKind::Integer),
];
const CONTROL_LAYOUT: Layout = &[("config", 2, SlotKind::Integer)];
const NO_PARAMS: Layout = &[];
const WAVE_ONLY: Layout = &[("wave", 2, SlotKind::Integer)];
const WAVE_FIELD: Layout = &[("wave", 2, SlotKind::Integer), ("field", 3, SlotKind::Integer)];
const SURFACE_RANGE: Layout = &[("surf1", 2, SlotKind::Integer), ("surf2", 3, SlotKind::Integer)];
const SINGLE_SURFACE: Layout = &[("surf", 2, SlotKind::Integer)];
const TRANSVERSE_RAY: Layout = &[
    ("surf", 2, SlotKind::Integer),
    ("wave", 3, SlotKind::Integer),
    ("hx", 4, SlotKind::Real),
    ("hy", 5, SlotKind::Real),
    ("px", 6, SlotKind::Real),
    ("py", 7, SlotKind::Real),
];
const REAL_RAY: Layout = &[
    ("wave", 2, SlotKind::Integer),
    ("hx", 3, SlotKind::Real),
    ("hy", 4, SlotKind::Real),
    ("px", 5, SlotKind::Real),
    ("py", 6, SlotKind::Real),
];
const MTF: Layout = &[
    ("field", 3, SlotKind::Integer),
    ("wave", 4, SlotKind::Integer),
    ("freq", 6, SlotKind::Real),
];
const DISTORTION: Layout = &[
    ("surf", 2, SlotKind::Integer),
    ("wave", 3, SlotKind::Integer),
    ("absolute", 4, SlotKind::Integer),
];
const AXIAL_COLOR: Layout = &[
    ("wave1", 2, SlotKind::Integer),
    ("wave2", 3, SlotKind::Integer),
    ("zone", 4, SlotKind::Real),
];

/// 内置操作数类型；未登记的名字为 Other
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperandType {
    // 控制与结构
    Conf,
    Dmfs,
    // 一阶参数
    Effl,
    Eflx,
    Efly,
    Fnum,
    Pimh,
    Totr,
    // 光线追迹
    Trac,
    Trar,
    Opdx,
    Reax,
    Reay,
    Raid,
    // 边界约束
    Mncg,
    Mxcg,
    Mneg,
    Mxeg,
    Mnca,
    Mxca,
    Mnea,
    Mxea,
    Dsag,
    Cvva,
    Pmcg,
    Pmeg,
    // MTF
    Mtfs,
    Mtft,
    Mtfa,
    // 像差
    Dist,
    Axcl,
    Other(String),
}

impl OperandType {
    /// 名字大小写不敏感；未登记的名字保留为 Other（大写）
    pub fn parse(name: &str) -> Self {
        let upper = name.trim().to_ascii_uppercase();
        match upper.as_str() {
            "CONF" => OperandType::Conf,
            "DMFS" => OperandType::Dmfs,
            "EFFL" => OperandType::Effl,
            "EFLX" => OperandType::Eflx,
            "EFLY" => OperandType::Efly,
            "FNUM" => OperandType::Fnum,
            "PIMH" => OperandType::Pimh,
            "TOTR" => OperandType::Totr,
            "TRAC" => OperandType::Trac,
            "TRAR" => OperandType::Trar,
            "OPDX" => OperandType::Opdx,
            "REAX" => OperandType::Reax,
            "REAY" => OperandType::Reay,
            "RAID" => OperandType::Raid,
            "MNCG" => OperandType::Mncg,
            "MXCG" => OperandType::Mxcg,
            "MNEG" => OperandType::Mneg,
            "MXEG" => OperandType::Mxeg,
            "MNCA" => OperandType::Mnca,
            "MXCA" => OperandType::Mxca,
            "MNEA" => OperandType::Mnea,
            "MXEA" => OperandType::Mxea,
            "DSAG" => OperandType::Dsag,
            "CVVA" => OperandType::Cvva,
            "PMCG" => OperandType::Pmcg,
            "PMEG" => OperandType::Pmeg,
            "MTFS" => OperandType::Mtfs,
            "MTFT" => OperandType::Mtft,
            "MTFA" => OperandType::Mtfa,
            "DIST" => OperandType::Dist,
            "AXCL" => OperandType::Axcl,
            _ => OperandType::Other(upper),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            OperandType::Conf => "CONF",
            OperandType::Dmfs => "DMFS",
            OperandType::Effl => "EFFL",
            OperandType::Eflx => "EFLX",
            OperandType::Efly => "EFLY",
            OperandType::Fnum => "FNUM",
            OperandType::Pimh => "PIMH",
            OperandType::Totr => "TOTR",
            OperandType::Trac => "TRAC",
            OperandType::Trar => "TRAR",
            OperandType::Opdx => "OPDX",
            OperandType::Reax => "REAX",
            OperandType::Reay => "REAY",
            OperandType::Raid => "RAID",
            OperandType::Mncg => "MNCG",
            OperandType::Mxcg => "MXCG",
            OperandType::Mneg => "MNEG",
            OperandType::Mxeg => "MXEG",
            OperandType::Mnca => "MNCA",
            OperandType::Mxca => "MXCA",
            OperandType::Mnea => "MNEA",
            OperandType::Mxea => "MXEA",
            OperandType::Dsag => "DSAG",
            OperandType::Cvva => "CVVA",
            OperandType::Pmcg => "PMCG",
            OperandType::Pmeg => "PMEG",
            OperandType::Mtfs => "MTFS",
            OperandType::Mtft => "MTFT",
            OperandType::Mtfa => "MTFA",
            OperandType::Dist => "DIST",
            OperandType::Axcl => "AXCL",
            OperandType::Other(name) => name,
        }
    }

    /// 内置布局；Other 返回 None（由注册表决定自定义或 DEFAULT）
    fn layout(&self) -> Option<Layout> {
        let layout = match self {
            OperandType::Conf => CONTROL_LAYOUT,
            OperandType::Dmfs => NO_PARAMS,
            OperandType::Effl | OperandType::Eflx | OperandType::Efly | OperandType::Fnum => {
                WAVE_ONLY
            }
            OperandType::Pimh => WAVE_FIELD,
            OperandType::Totr
            | OperandType::Mncg
            | OperandType::Mxcg
            | OperandType::Mneg
            | OperandType::Mxeg
            | OperandType::Mnca
            | OperandType::Mxca
            | OperandType::Mnea
            | OperandType::Mxea
            | OperandType::Dsag => SURFACE_RANGE,
            OperandType::Cvva | OperandType::Pmcg | OperandType::Pmeg => SINGLE_SURFACE,
            OperandType::Trac | OperandType::Trar | OperandType::Opdx => TRANSVERSE_RAY,
            OperandType::Reax | OperandType::Reay | OperandType::Raid => REAL_RAY,
            OperandType::Mtfs | OperandType::Mtft | OperandType::Mtfa => MTF,
            OperandType::Dist => DISTORTION,
            OperandType::Axcl => AXIAL_COLOR,
            OperandType::Other(_) => return None,
        };
        Some(layout)
    }

    pub fn is_control(&self) -> bool {
        matches!(self, OperandType::Conf)
    }

    const BUILTIN: [&'static str; 31] = [
        "CONF", "DMFS", "EFFL", "EFLX", "EFLY", "FNUM", "PIMH", "TOTR", "TRAC", "TRAR", "OPDX",
        "REAX", "REAY", "RAID", "MNCG", "MXCG", "MNEG", "MXEG", "MNCA", "MXCA", "MNEA", "MXEA",
        "DSAG", "CVVA", "PMCG", "PMEG", "MTFS", "MTFT", "MTFA", "DIST", "AXCL",
    ];
}

impl fmt::Display for OperandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一种操作数的完整参数布局（构建注册表时生成，之后只读）
#[derive(Debug, Clone, PartialEq)]
pub struct OperandSpec {
    type_name: String,
    slots: BTreeMap<String, Slot>,
}

impl OperandSpec {
    fn from_layout(type_name: &str, layout: Layout) -> Self {
        Self {
            type_name: type_name.to_string(),
            slots: layout
                .iter()
                .map(|&(name, index, kind)| (name.to_string(), Slot { index, kind }))
                .collect(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn slot(&self, param: &str) -> Option<Slot> {
        self.slots.get(param).copied()
    }

    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }
}

/// 配置中的自定义参数槽
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CustomSlot {
    pub slot: u8,
    pub kind: SlotKind,
}

/// 配置中的自定义布局：参数名 → 槽位
pub type CustomOperandLayout = BTreeMap<String, CustomSlot>;

/// 操作数布局注册表：类型名 → OperandSpec，未知类型回退到 DEFAULT
#[derive(Debug, Clone)]
pub struct OperandSchemaRegistry {
    specs: HashMap<String, OperandSpec>,
    default: OperandSpec,
}

impl Default for OperandSchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OperandSchemaRegistry {
    /// 仅包含内置布局
    pub fn new() -> Self {
        let specs = OperandType::BUILTIN
            .iter()
            .filter_map(|name| {
                let ty = OperandType::parse(name);
                ty.layout()
                    .map(|layout| (name.to_string(), OperandSpec::from_layout(name, layout)))
            })
            .collect();
        Self {
            specs,
            default: OperandSpec::from_layout(DEFAULT_SPEC_NAME, DEFAULT_LAYOUT),
        }
    }

    /// 内置布局 + 配置中的自定义布局（可覆盖内置类型，CONF 除外）
    pub fn with_custom(custom: &HashMap<String, CustomOperandLayout>) -> Result<Self, OptError> {
        let mut registry = Self::new();
        for (raw_name, layout) in custom {
            let name = raw_name.trim().to_ascii_uppercase();
            validate_type_name(&name)?;
            if name == CONTROL_TYPE {
                return Err(OptError::Configuration(
                    "the control operand layout cannot be overridden".to_string(),
                ));
            }
            let spec = build_custom_spec(&name, layout)?;
            tracing::debug!(operand = %name, params = layout.len(), "custom operand layout registered");
            registry.specs.insert(name, spec);
        }
        Ok(registry)
    }

    /// 查找布局；从不失败，未登记的类型返回 DEFAULT
    pub fn resolve(&self, type_name: &str) -> &OperandSpec {
        let key = type_name.trim().to_ascii_uppercase();
        self.specs.get(&key).unwrap_or(&self.default)
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.specs
            .contains_key(&type_name.trim().to_ascii_uppercase())
    }

    pub fn default_spec(&self) -> &OperandSpec {
        &self.default
    }
}

fn validate_type_name(name: &str) -> Result<(), OptError> {
    let valid = (1..=4).contains(&name.len()) && name.chars().all(|c| c.is_ascii_alphanumeric());
    if valid && name != DEFAULT_SPEC_NAME {
        Ok(())
    } else {
        Err(OptError::Configuration(format!(
            "invalid operand type name '{name}' (expected 1-4 ASCII letters/digits)"
        )))
    }
}

fn build_custom_spec(name: &str, layout: &CustomOperandLayout) -> Result<OperandSpec, OptError> {
    let mut used: BTreeMap<u8, &str> = BTreeMap::new();
    let mut slots = BTreeMap::new();
    for (param, custom) in layout {
        if param.trim().is_empty() {
            return Err(OptError::Configuration(format!(
                "operand {name}: empty parameter name"
            )));
        }
        if !(MIN_SLOT_INDEX..=MAX_SLOT_INDEX).contains(&custom.slot) {
            return Err(OptError::Configuration(format!(
                "operand {name}: slot {} for '{param}' outside {MIN_SLOT_INDEX}..={MAX_SLOT_INDEX}",
                custom.slot
            )));
        }
        if let Some(previous) = used.insert(custom.slot, param) {
            return Err(OptError::Configuration(format!(
                "operand {name}: slot {} used by both '{previous}' and '{param}'",
                custom.slot
            )));
        }
        slots.insert(
            param.clone(),
            Slot {
                index: custom.slot,
                kind: custom.kind,
            },
        );
    }
    Ok(OperandSpec {
        type_name: name.to_string(),
        slots,
    })
}
