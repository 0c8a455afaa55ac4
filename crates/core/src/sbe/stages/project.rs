use anyhow::Result;

use super::{BoxedStage, PlanStage, PlanState};
use crate::sbe::{EExpression, ExecCtx, SlotId, vm};

/// Evaluates one expression per output slot for every row of its input
#[derive(Debug)]
pub struct ProjectStage {
	input: BoxedStage,
	projects: Vec<(SlotId, EExpression)>,
}

impl ProjectStage {
	pub fn new(input: BoxedStage, projects: Vec<(SlotId, EExpression)>) -> Self {
		Self {
			input,
			projects,
		}
	}
}

impl PlanStage for ProjectStage {
	fn name(&self) -> &'static str {
		"project"
	}

	fn attrs(&self) -> Vec<(String, String)> {
		self.projects.iter().map(|(slot, expr)| (format!("s{slot}"), expr.to_string())).collect()
	}

	fn children(&self) -> Vec<&dyn PlanStage> {
		vec![self.input.as_ref()]
	}

	fn open(&mut self, ctx: &mut ExecCtx, reopen: bool) -> Result<()> {
		trace!(target: "sbe::stages", reopen, "opening project stage");
		self.input.open(ctx, reopen)
	}

	fn get_next(&mut self, ctx: &mut ExecCtx) -> Result<PlanState> {
		if self.input.get_next(ctx)? == PlanState::IsEof {
			return Ok(PlanState::IsEof);
		}
		for (slot, expr) in &self.projects {
			let value = vm::eval(expr, ctx)?;
			ctx.set(*slot, value);
		}
		Ok(PlanState::Advanced)
	}

	fn close(&mut self, ctx: &mut ExecCtx) {
		trace!(target: "sbe::stages", "closing project stage");
		self.input.close(ctx);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sbe::EPrimBinaryOp;
	use crate::sbe::stages::{ValuesStage, collect_rows};
	use crate::val::Value;

	#[test]
	fn evaluates_each_row() {
		let rows = vec![vec![Value::NumberInt32(1)], vec![Value::NumberInt32(5)]];
		let doubled = EExpression::binary(EPrimBinaryOp::Add, EExpression::var(1), EExpression::var(1));
		let mut stage = ProjectStage::new(Box::new(ValuesStage::new(vec![1], rows)), vec![(2, doubled)]);
		let mut ctx = ExecCtx::new();
		let out = collect_rows(&mut stage, &mut ctx, &[2]).unwrap();
		assert_eq!(out.iter().map(|r| r[0].to_string()).collect::<Vec<_>>(), ["2", "10"]);
	}
}
