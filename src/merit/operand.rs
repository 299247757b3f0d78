//! 操作数与评价函数
//!
//! MeritFunction 是有序的操作数序列，始终非空，第 0 位固定为控制操作数（CONF）。
//! 只能通过 MeritFunctionBuilder 修改。

use std::collections::BTreeMap;

use serde::Serialize;

use crate::merit::{OperandType, SlotValue};

/// 评价函数中的一项
#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    operand_type: OperandType,
    target: f64,
    weight: f64,
    slots: BTreeMap<u8, SlotValue>,
    /// 最近一次重算得到的值；新增后在下次重算前为 None
    value: Option<f64>,
}

impl Operand {
    pub(crate) fn new(operand_type: OperandType, target: f64, weight: f64) -> Self {
        Self {
            operand_type,
            target,
            weight,
            slots: BTreeMap::new(),
            value: None,
        }
    }

    pub(crate) fn control() -> Self {
        Self::new(OperandType::Conf, 0.0, 0.0)
    }

    pub fn operand_type(&self) -> &OperandType {
        &self.operand_type
    }

    pub fn type_name(&self) -> &str {
        self.operand_type.as_str()
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn slot(&self, index: u8) -> Option<SlotValue> {
        self.slots.get(&index).copied()
    }

    pub fn slots(&self) -> &BTreeMap<u8, SlotValue> {
        &self.slots
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn is_control(&self) -> bool {
        self.operand_type.is_control()
    }

    pub(crate) fn set_slot(&mut self, index: u8, value: SlotValue) {
        self.slots.insert(index, value);
    }

    pub(crate) fn set_target(&mut self, target: f64) {
        self.target = target;
    }

    pub(crate) fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
    }

    pub(crate) fn set_value(&mut self, value: Option<f64>) {
        self.value = value;
    }
}

/// list_operands 的行
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperandRow {
    pub index: usize,
    pub type_name: String,
    pub target: f64,
    pub weight: f64,
    pub value: Option<f64>,
}

/// 有序评价函数；不变量：非空且第 0 位为控制操作数
#[derive(Debug, Clone, PartialEq)]
pub struct MeritFunction {
    operands: Vec<Operand>,
}

impl Default for MeritFunction {
    fn default() -> Self {
        Self::new()
    }
}

impl MeritFunction {
    pub fn new() -> Self {
        Self {
            operands: vec![Operand::control()],
        }
    }

    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    pub fn get(&self, index: usize) -> Option<&Operand> {
        self.operands.get(index)
    }

    pub fn len(&self) -> usize {
        self.operands.len()
    }

    /// 恒为 false
    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }

    /// 参与计算的操作数（去掉第 0 位的控制操作数）
    pub fn contributing(&self) -> &[Operand] {
        &self.operands[1..]
    }

    pub(crate) fn push(&mut self, operand: Operand) -> &Operand {
        self.operands.push(operand);
        let last = self.operands.len() - 1;
        &self.operands[last]
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Operand> {
        self.operands.get_mut(index)
    }

    pub(crate) fn remove(&mut self, index: usize) -> Operand {
        self.operands.remove(index)
    }

    /// 截断到只剩控制操作数；序列为空或首项不是控制操作数时重建
    pub(crate) fn reset(&mut self) {
        self.operands.truncate(1);
        match self.operands.first_mut() {
            Some(first) if first.is_control() => first.set_value(None),
            Some(first) => *first = Operand::control(),
            None => self.operands.push(Operand::control()),
        }
    }

    pub(crate) fn operands_mut(&mut self) -> impl Iterator<Item = &mut Operand> {
        self.operands.iter_mut()
    }
}
