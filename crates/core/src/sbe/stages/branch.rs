use anyhow::Result;

use super::{BoxedStage, PlanStage, PlanState, slot_list};
use crate::sbe::{EExpression, ExecCtx, SlotId, vm};

/// Picks one of two children when opened, according to `filter`, and renames the chosen child's
/// slots to `outputs`.
#[derive(Debug)]
pub struct BranchStage {
	then_stage: BoxedStage,
	else_stage: BoxedStage,
	filter: EExpression,
	then_slots: Vec<SlotId>,
	else_slots: Vec<SlotId>,
	outputs: Vec<SlotId>,
	active: Option<bool>,
}

impl BranchStage {
	pub fn new(
		then_stage: BoxedStage,
		else_stage: BoxedStage,
		filter: EExpression,
		then_slots: Vec<SlotId>,
		else_slots: Vec<SlotId>,
		outputs: Vec<SlotId>,
	) -> Self {
		Self {
			then_stage,
			else_stage,
			filter,
			then_slots,
			else_slots,
			outputs,
			active: None,
		}
	}
}

impl PlanStage for BranchStage {
	fn name(&self) -> &'static str {
		"branch"
	}

	fn attrs(&self) -> Vec<(String, String)> {
		vec![
			("filter".to_string(), self.filter.to_string()),
			("outputs".to_string(), slot_list(&self.outputs)),
		]
	}

	fn children(&self) -> Vec<&dyn PlanStage> {
		vec![self.then_stage.as_ref(), self.else_stage.as_ref()]
	}

	fn open(&mut self, ctx: &mut ExecCtx, reopen: bool) -> Result<()> {
		let take_then = vm::eval_predicate(&self.filter, ctx)?;
		if take_then {
			self.then_stage.open(ctx, reopen)?;
		} else {
			self.else_stage.open(ctx, reopen)?;
		}
		self.active = Some(take_then);
		Ok(())
	}

	fn get_next(&mut self, ctx: &mut ExecCtx) -> Result<PlanState> {
		let (stage, slots) = match self.active {
			Some(true) => (&mut self.then_stage, &self.then_slots),
			Some(false) => (&mut self.else_stage, &self.else_slots),
			None => return Ok(PlanState::IsEof),
		};
		if stage.get_next(ctx)? == PlanState::IsEof {
			return Ok(PlanState::IsEof);
		}
		for (input, output) in slots.iter().zip(&self.outputs) {
			let value = ctx.get(*input).clone();
			ctx.set(*output, value);
		}
		Ok(PlanState::Advanced)
	}

	fn close(&mut self, ctx: &mut ExecCtx) {
		match self.active.take() {
			Some(true) => self.then_stage.close(ctx),
			Some(false) => self.else_stage.close(ctx),
			None => {}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sbe::stages::{ValuesStage, collect_rows};
	use crate::val::Value;

	#[test]
	fn chooses_a_side_when_opened() {
		let then_stage = ValuesStage::new(vec![1], vec![vec![Value::new_string("then")]]);
		let else_stage = ValuesStage::new(vec![2], vec![vec![Value::new_string("else")]]);
		let mut stage =
			BranchStage::new(Box::new(then_stage), Box::new(else_stage), EExpression::var(7), vec![1], vec![2], vec![3]);
		let mut ctx = ExecCtx::new();
		ctx.set(7, Value::Boolean(true));
		assert_eq!(collect_rows(&mut stage, &mut ctx, &[3]).unwrap()[0][0].to_string(), "\"then\"");
		ctx.set(7, Value::Null);
		assert_eq!(collect_rows(&mut stage, &mut ctx, &[3]).unwrap()[0][0].to_string(), "\"else\"");
	}
}
