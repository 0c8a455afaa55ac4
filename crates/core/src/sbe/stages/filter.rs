use anyhow::Result;

use super::{BoxedStage, PlanStage, PlanState};
use crate::sbe::{EExpression, ExecCtx, vm};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterKind {
	/// Drops rows for which the predicate is not true
	Rows,
	/// Evaluates the predicate once when opened; if it is not true the stage is empty and its
	/// input is never opened
	Constant,
	/// Stops at the first row for which the predicate is not true
	EofIfFalse,
}

#[derive(Debug)]
pub struct FilterStage {
	input: BoxedStage,
	predicate: EExpression,
	kind: FilterKind,
	opened: bool,
	input_open: bool,
	done: bool,
}

impl FilterStage {
	pub fn new(input: BoxedStage, predicate: EExpression) -> Self {
		Self::with_kind(input, predicate, FilterKind::Rows)
	}

	pub fn constant(input: BoxedStage, predicate: EExpression) -> Self {
		Self::with_kind(input, predicate, FilterKind::Constant)
	}

	pub fn with_kind(input: BoxedStage, predicate: EExpression, kind: FilterKind) -> Self {
		Self {
			input,
			predicate,
			kind,
			opened: false,
			input_open: false,
			done: false,
		}
	}
}

impl PlanStage for FilterStage {
	fn name(&self) -> &'static str {
		match self.kind {
			FilterKind::Rows => "filter",
			FilterKind::Constant => "cfilter",
			FilterKind::EofIfFalse => "efilter",
		}
	}

	fn attrs(&self) -> Vec<(String, String)> {
		vec![("predicate".to_string(), self.predicate.to_string())]
	}

	fn children(&self) -> Vec<&dyn PlanStage> {
		vec![self.input.as_ref()]
	}

	fn open(&mut self, ctx: &mut ExecCtx, reopen: bool) -> Result<()> {
		self.done = false;
		if self.kind == FilterKind::Constant && !vm::eval_predicate(&self.predicate, ctx)? {
			self.done = true;
			return Ok(());
		}
		self.input.open(ctx, reopen && self.opened)?;
		self.opened = true;
		self.input_open = true;
		Ok(())
	}

	fn get_next(&mut self, ctx: &mut ExecCtx) -> Result<PlanState> {
		if self.done {
			return Ok(PlanState::IsEof);
		}
		loop {
			if self.input.get_next(ctx)? == PlanState::IsEof {
				return Ok(PlanState::IsEof);
			}
			match self.kind {
				FilterKind::Constant => return Ok(PlanState::Advanced),
				FilterKind::Rows => {
					if vm::eval_predicate(&self.predicate, ctx)? {
						return Ok(PlanState::Advanced);
					}
				}
				FilterKind::EofIfFalse => {
					if vm::eval_predicate(&self.predicate, ctx)? {
						return Ok(PlanState::Advanced);
					}
					self.done = true;
					return Ok(PlanState::IsEof);
				}
			}
		}
	}

	fn close(&mut self, ctx: &mut ExecCtx) {
		if self.input_open {
			self.input.close(ctx);
			self.input_open = false;
		}
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;
	use crate::sbe::EPrimBinaryOp;
	use crate::sbe::stages::{ValuesStage, collect_rows};
	use crate::val::Value;

	fn input() -> BoxedStage {
		let rows = [1, 4, 2, 5].into_iter().map(|i| vec![Value::NumberInt32(i)]).collect();
		Box::new(ValuesStage::new(vec![1], rows))
	}

	fn below_three() -> EExpression {
		EExpression::binary(EPrimBinaryOp::Less, EExpression::var(1), EExpression::constant(3))
	}

	#[rstest]
	#[case::rows(FilterKind::Rows, vec!["1", "2"])]
	#[case::eof_if_false(FilterKind::EofIfFalse, vec!["1"])]
	fn per_row_predicates(#[case] kind: FilterKind, #[case] expected: Vec<&str>) {
		let mut stage = FilterStage::with_kind(input(), below_three(), kind);
		let mut ctx = ExecCtx::new();
		let rows = collect_rows(&mut stage, &mut ctx, &[1]).unwrap();
		assert_eq!(rows.iter().map(|r| r[0].to_string()).collect::<Vec<_>>(), expected);
	}

	#[test]
	fn constant_predicates_gate_the_whole_input() {
		let mut ctx = ExecCtx::new();
		ctx.set(9, Value::Boolean(false));
		let mut stage = FilterStage::constant(input(), EExpression::var(9));
		assert!(collect_rows(&mut stage, &mut ctx, &[1]).unwrap().is_empty());
		ctx.set(9, Value::Boolean(true));
		assert_eq!(collect_rows(&mut stage, &mut ctx, &[1]).unwrap().len(), 4);
	}
}
