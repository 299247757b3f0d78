//! 评价函数构建器
//!
//! 持有唯一可变的 MeritFunction：增删改、清空、向导批量生成；
//! 命名参数经 OperandSchemaRegistry 映射到单元格，未知参数按 ParamPolicy 处理（默认警告并丢弃）。

use serde::{Deserialize, Serialize};

use crate::core::OptError;
use crate::engine::{DesignEngine, EngineError, SystemSummary};
use crate::merit::wizard::{self, WizardConfig, WizardType};
use crate::merit::{
    MeritFunction, Operand, OperandRow, OperandSchemaRegistry, OperandType, SlotValue, CONTROL_TYPE,
};

/// 未知命名参数的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamPolicy {
    /// 记录警告并丢弃
    #[default]
    Lenient,
    /// 返回 UnknownParameter 错误，不追加操作数
    Strict,
}

/// 评价函数构建器
#[derive(Debug, Clone)]
pub struct MeritFunctionBuilder {
    registry: OperandSchemaRegistry,
    merit: MeritFunction,
    policy: ParamPolicy,
}

impl Default for MeritFunctionBuilder {
    fn default() -> Self {
        Self::new(OperandSchemaRegistry::new())
    }
}

impl MeritFunctionBuilder {
    pub fn new(registry: OperandSchemaRegistry) -> Self {
        Self {
            registry,
            merit: MeritFunction::new(),
            policy: ParamPolicy::Lenient,
        }
    }

    pub fn with_policy(mut self, policy: ParamPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ParamPolicy {
        self.policy
    }

    pub fn registry(&self) -> &OperandSchemaRegistry {
        &self.registry
    }

    pub fn merit_function(&self) -> &MeritFunction {
        &self.merit
    }

    /// 在末尾追加操作数；参数值按槽位类型转换（Integer 截断）
    pub fn add_operand(
        &mut self,
        type_name: &str,
        target: f64,
        weight: f64,
        params: &[(&str, f64)],
    ) -> Result<&Operand, OptError> {
        let operand = self.build_operand(type_name, target, weight, params)?;
        tracing::debug!(operand = %operand.type_name(), target, weight, "operand added");
        Ok(self.merit.push(operand))
    }

    fn build_operand(
        &self,
        type_name: &str,
        target: f64,
        weight: f64,
        params: &[(&str, f64)],
    ) -> Result<Operand, OptError> {
        let operand_type = OperandType::parse(type_name);
        let spec = self.registry.resolve(operand_type.as_str());

        let mut operand = Operand::new(operand_type.clone(), target, weight);
        for &(name, value) in params {
            match spec.slot(name) {
                Some(slot) => operand.set_slot(slot.index, SlotValue::coerce(slot.kind, value)),
                None => match self.policy {
                    ParamPolicy::Lenient => tracing::warn!(
                        operand = %operand_type,
                        param = %name,
                        "Parameter not defined for operand layout ({}), ignored",
                        spec.type_name()
                    ),
                    ParamPolicy::Strict => {
                        return Err(OptError::UnknownParameter {
                            operand: operand_type.to_string(),
                            param: name.to_string(),
                        })
                    }
                },
            }
        }
        Ok(operand)
    }

    /// 截断到只剩控制操作数
    pub fn clear(&mut self) {
        self.merit.reset();
        tracing::info!("Merit function reset to a single {} operand", CONTROL_TYPE);
    }

    /// 用向导生成操作数，返回追加的数量
    ///
    /// 先在副本上生成，全部成功后才替换；出错时评价函数保持原样。
    pub fn apply_wizard(
        &mut self,
        wizard_type: WizardType,
        config: &WizardConfig,
        summary: &SystemSummary,
    ) -> Result<usize, OptError> {
        let drafts = wizard::generate(wizard_type, config, summary);
        let mut merit = if config.clear_existing {
            MeritFunction::new()
        } else {
            self.merit.clone()
        };
        for draft in &drafts {
            merit.push(self.build_operand(
                draft.type_name,
                draft.target,
                draft.weight,
                &draft.params,
            )?);
        }
        let added = drafts.len();
        if config.clear_existing {
            tracing::info!("Merit function reset to a single {} operand", CONTROL_TYPE);
        }
        self.merit = merit;
        tracing::info!(
            wizard = %wizard_type,
            added,
            total = self.merit.len(),
            "Merit function generated by wizard"
        );
        Ok(added)
    }

    /// 修改目标值/权重；任一控制操作数带任一字段时返回 false 且不修改
    pub fn edit_operand(
        &mut self,
        index: usize,
        target: Option<f64>,
        weight: Option<f64>,
    ) -> Result<bool, OptError> {
        let count = self.merit.len();
        if index >= count {
            return Err(OptError::IndexOutOfRange { index, count });
        }
        let is_control = self.merit.get(index).map_or(false, Operand::is_control);
        if is_control && (target.is_some() || weight.is_some()) {
            tracing::warn!("Control operand target/weight cannot be edited");
            return Ok(false);
        }
        if let Some(operand) = self.merit.get_mut(index) {
            if let Some(t) = target {
                operand.set_target(t);
            }
            if let Some(w) = weight {
                operand.set_weight(w);
            }
        }
        Ok(true)
    }

    /// 删除操作数；删除控制操作数是空操作，返回是否真正删除
    pub fn delete_operand(&mut self, index: usize) -> Result<bool, OptError> {
        let count = self.merit.len();
        if index >= count {
            return Err(OptError::IndexOutOfRange { index, count });
        }
        if index == 0 {
            tracing::warn!("Cannot delete the control operand");
            return Ok(false);
        }
        let removed = self.merit.remove(index);
        tracing::debug!(operand = %removed.type_name(), index, "operand deleted");
        Ok(true)
    }

    pub fn list_operands(&self) -> Vec<OperandRow> {
        self.merit
            .operands()
            .iter()
            .enumerate()
            .map(|(index, op)| OperandRow {
                index,
                type_name: op.type_name().to_string(),
                target: op.target(),
                weight: op.weight(),
                value: op.value(),
            })
            .collect()
    }

    pub fn get_operand_count(&self) -> usize {
        self.merit.len()
    }

    /// 把当前评价函数推送到引擎
    pub async fn sync(&self, engine: &dyn DesignEngine) -> Result<(), OptError> {
        engine.apply_merit_function(&self.merit).await?;
        Ok(())
    }

    /// 同步后向引擎取回每个操作数的当前值
    pub async fn update_values(&mut self, engine: &dyn DesignEngine) -> Result<(), OptError> {
        self.sync(engine).await?;
        let values = engine.operand_values(&self.merit).await?;
        if values.len() != self.merit.len() {
            return Err(OptError::Engine(EngineError::Call(format!(
                "engine returned {} operand values for {} operands",
                values.len(),
                self.merit.len()
            ))));
        }
        for (operand, value) in self.merit.operands_mut().zip(values) {
            operand.set_value(Some(value));
        }
        Ok(())
    }

    /// 只读评估当前目标值，不运行任何优化循环
    pub async fn get_objective_value(&self, engine: &dyn DesignEngine) -> Result<f64, OptError> {
        self.sync(engine).await?;
        Ok(engine.evaluate().await?)
    }
}
