//! 评价函数：操作数布局注册表、操作数序列、构建器与优化向导

pub mod builder;
pub mod operand;
pub mod quadrature;
pub mod schema;
pub mod wizard;

pub use builder::{MeritFunctionBuilder, ParamPolicy};
pub use operand::{MeritFunction, Operand, OperandRow};
pub use schema::{
    CustomOperandLayout, CustomSlot, OperandSchemaRegistry, OperandSpec, OperandType, Slot,
    SlotKind, SlotValue, CONTROL_TYPE,
};
pub use wizard::{WizardConfig, WizardType};
