use anyhow::Result;

use super::{BoxedStage, PlanStage, PlanState};
use crate::sbe::{EExpression, ExecCtx, vm};

/// A nested-loop join. The inner side is reopened for every outer row, so it sees that row's
/// slots.
#[derive(Debug)]
pub struct LoopJoinStage {
	outer: BoxedStage,
	inner: BoxedStage,
	predicate: Option<EExpression>,
	inner_opened: bool,
	need_outer: bool,
}

impl LoopJoinStage {
	pub fn new(outer: BoxedStage, inner: BoxedStage, predicate: Option<EExpression>) -> Self {
		Self {
			outer,
			inner,
			predicate,
			inner_opened: false,
			need_outer: true,
		}
	}
}

impl PlanStage for LoopJoinStage {
	fn name(&self) -> &'static str {
		"nlj"
	}

	fn attrs(&self) -> Vec<(String, String)> {
		match &self.predicate {
			Some(p) => vec![("predicate".to_string(), p.to_string())],
			None => vec![],
		}
	}

	fn children(&self) -> Vec<&dyn PlanStage> {
		vec![self.outer.as_ref(), self.inner.as_ref()]
	}

	fn open(&mut self, ctx: &mut ExecCtx, reopen: bool) -> Result<()> {
		trace!(target: "sbe::stages", reopen, "opening loop join");
		self.need_outer = true;
		self.outer.open(ctx, reopen)
	}

	fn get_next(&mut self, ctx: &mut ExecCtx) -> Result<PlanState> {
		loop {
			if self.need_outer {
				if self.outer.get_next(ctx)? == PlanState::IsEof {
					return Ok(PlanState::IsEof);
				}
				if self.inner_opened {
					self.inner.close(ctx);
				}
				self.inner.open(ctx, self.inner_opened)?;
				self.inner_opened = true;
				self.need_outer = false;
			}
			if self.inner.get_next(ctx)? == PlanState::IsEof {
				self.need_outer = true;
				continue;
			}
			match &self.predicate {
				Some(p) if !vm::eval_predicate(p, ctx)? => continue,
				_ => return Ok(PlanState::Advanced),
			}
		}
	}

	fn close(&mut self, ctx: &mut ExecCtx) {
		trace!(target: "sbe::stages", "closing loop join");
		if self.inner_opened {
			self.inner.close(ctx);
			self.inner_opened = false;
		}
		self.outer.close(ctx);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sbe::EPrimBinaryOp;
	use crate::sbe::stages::{ProjectStage, ValuesStage, collect_rows};
	use crate::val::Value;

	#[test]
	fn inner_side_is_correlated_with_outer_rows() {
		let outer = ValuesStage::new(vec![1], (1..=3).map(|i| vec![Value::NumberInt32(i)]).collect());
		let inner = ProjectStage::new(
			Box::new(ValuesStage::new(vec![2], vec![vec![Value::NumberInt32(10)], vec![Value::NumberInt32(20)]])),
			vec![(3, EExpression::binary(EPrimBinaryOp::Add, EExpression::var(1), EExpression::var(2)))],
		);
		let odd_sums = EExpression::binary(
			EPrimBinaryOp::Neq,
			EExpression::var(1),
			EExpression::constant(2),
		);
		let mut stage = LoopJoinStage::new(Box::new(outer), Box::new(inner), Some(odd_sums));
		let mut ctx = ExecCtx::new();
		let rows = collect_rows(&mut stage, &mut ctx, &[3]).unwrap();
		let got: Vec<String> = rows.iter().map(|r| r[0].to_string()).collect();
		assert_eq!(got, ["11", "21", "13", "23"]);
	}
}
