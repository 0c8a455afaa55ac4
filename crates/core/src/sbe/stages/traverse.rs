use anyhow::Result;

use super::{BoxedStage, PlanStage, PlanState};
use crate::sbe::{EExpression, ExecCtx, SlotId, vm};
use crate::val::{Array, ArrayEnumerator, Value};

/// Maps an inner stage over the elements of an array held in `in_slot`.
///
/// For every outer row the inner side runs once per array element (descending into nested
/// arrays up to `depth` levels) with `in_slot` rebound to that element. The value the inner side
/// leaves in `out_inner` is collected into an array, or combined through `fold` when one is
/// given, and written to `out_slot`. A `finish` predicate which turns true stops the iteration
/// early. Non-array inputs run the inner side once on the value itself.
#[derive(Debug)]
pub struct TraverseStage {
	outer: BoxedStage,
	inner: BoxedStage,
	in_slot: SlotId,
	out_slot: SlotId,
	out_inner: SlotId,
	fold: Option<EExpression>,
	finish: Option<EExpression>,
	depth: usize,
	inner_opened: bool,
}

impl TraverseStage {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		outer: BoxedStage,
		inner: BoxedStage,
		in_slot: SlotId,
		out_slot: SlotId,
		out_inner: SlotId,
		fold: Option<EExpression>,
		finish: Option<EExpression>,
		depth: usize,
	) -> Self {
		Self {
			outer,
			inner,
			in_slot,
			out_slot,
			out_inner,
			fold,
			finish,
			depth,
			inner_opened: false,
		}
	}

	fn open_inner(&mut self, ctx: &mut ExecCtx) -> Result<()> {
		if self.inner_opened {
			self.inner.close(ctx);
		}
		self.inner.open(ctx, self.inner_opened)?;
		self.inner_opened = true;
		Ok(())
	}

	/// Runs the inner side on one element. Returns false once the finish predicate holds.
	fn visit(&mut self, ctx: &mut ExecCtx, element: Value, acc: &mut Option<Value>, collected: &mut Array) -> Result<bool> {
		ctx.set(self.in_slot, element);
		self.open_inner(ctx)?;
		if self.inner.get_next(ctx)? == PlanState::IsEof {
			return Ok(true);
		}
		let produced = ctx.get(self.out_inner).clone();
		match &self.fold {
			None => {
				collected.push(produced);
				Ok(true)
			}
			Some(fold) => {
				let next = match acc.take() {
					None => produced,
					Some(prev) => {
						ctx.set(self.out_slot, prev);
						vm::eval(fold, ctx)?
					}
				};
				ctx.set(self.out_slot, next.clone());
				*acc = Some(next);
				match &self.finish {
					Some(finish) => Ok(!vm::eval_predicate(finish, ctx)?),
					None => Ok(true),
				}
			}
		}
	}

	fn traverse(
		&mut self,
		ctx: &mut ExecCtx,
		array: &Value,
		level: usize,
		acc: &mut Option<Value>,
		collected: &mut Array,
	) -> Result<bool> {
		let mut it = ArrayEnumerator::new(array);
		while !it.at_end() {
			let element = it.view().clone();
			let keep_going = if element.tag().is_array() && level + 1 < self.depth {
				self.traverse(ctx, &element, level + 1, acc, collected)?
			} else {
				self.visit(ctx, element, acc, collected)?
			};
			if !keep_going {
				return Ok(false);
			}
			it.advance();
		}
		Ok(true)
	}
}

impl PlanStage for TraverseStage {
	fn name(&self) -> &'static str {
		"traverse"
	}

	fn attrs(&self) -> Vec<(String, String)> {
		let mut attrs = vec![
			("in".to_string(), format!("s{}", self.in_slot)),
			("out".to_string(), format!("s{}", self.out_slot)),
			("outInner".to_string(), format!("s{}", self.out_inner)),
			("depth".to_string(), self.depth.to_string()),
		];
		if let Some(fold) = &self.fold {
			attrs.push(("fold".to_string(), fold.to_string()));
		}
		if let Some(finish) = &self.finish {
			attrs.push(("final".to_string(), finish.to_string()));
		}
		attrs
	}

	fn children(&self) -> Vec<&dyn PlanStage> {
		vec![self.outer.as_ref(), self.inner.as_ref()]
	}

	fn open(&mut self, ctx: &mut ExecCtx, reopen: bool) -> Result<()> {
		trace!(target: "sbe::stages", reopen, "opening traverse");
		self.outer.open(ctx, reopen)
	}

	fn get_next(&mut self, ctx: &mut ExecCtx) -> Result<PlanState> {
		if self.outer.get_next(ctx)? == PlanState::IsEof {
			return Ok(PlanState::IsEof);
		}
		let input = ctx.get(self.in_slot).clone();
		if input.tag().is_array() && self.depth > 0 {
			let mut acc = None;
			let mut collected = Array::new();
			self.traverse(ctx, &input, 0, &mut acc, &mut collected)?;
			let out = match self.fold {
				Some(_) => acc.unwrap_or_default(),
				None => Value::Array(Box::new(collected)),
			};
			ctx.set(self.out_slot, out);
		} else {
			self.open_inner(ctx)?;
			let out = match self.inner.get_next(ctx)? {
				PlanState::Advanced => ctx.get(self.out_inner).clone(),
				PlanState::IsEof => Value::Nothing,
			};
			ctx.set(self.out_slot, out);
		}
		ctx.set(self.in_slot, input);
		Ok(PlanState::Advanced)
	}

	fn close(&mut self, ctx: &mut ExecCtx) {
		trace!(target: "sbe::stages", "closing traverse");
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
	use crate::sbe::stages::{CoScanStage, FilterStage, LimitSkipStage, ProjectStage, ValuesStage, collect_rows};
	use crate::val::json::from_json;

	fn one_row() -> BoxedStage {
		Box::new(LimitSkipStage::new(Box::new(CoScanStage::new()), Some(1), 0))
	}

	fn outer(json: serde_json::Value) -> BoxedStage {
		Box::new(ValuesStage::new(vec![1], vec![vec![from_json(&json).unwrap()]]))
	}

	fn times_ten() -> BoxedStage {
		let expr = EExpression::binary(EPrimBinaryOp::Mul, EExpression::var(1), EExpression::constant(10));
		Box::new(ProjectStage::new(one_row(), vec![(3, expr)]))
	}

	fn run(stage: &mut TraverseStage) -> String {
		let mut ctx = ExecCtx::new();
		let rows = collect_rows(stage, &mut ctx, &[2, 1]).unwrap();
		assert_eq!(rows.len(), 1);
		rows[0][0].to_string()
	}

	#[test]
	fn maps_over_one_level() {
		let mut stage = TraverseStage::new(outer(serde_json::json!([1, [2], 3])), times_ten(), 1, 2, 3, None, None, 1);
		// [2] reaches the inner side whole, and multiplying it yields nothing
		assert_eq!(run(&mut stage), "[10, 30]");
	}

	#[test]
	fn scalars_run_the_inner_side_once() {
		let mut stage = TraverseStage::new(outer(serde_json::json!(4)), times_ten(), 1, 2, 3, None, None, 1);
		assert_eq!(run(&mut stage), "40");
	}

	#[test]
	fn filtered_elements_are_dropped() {
		let keep_big = EExpression::binary(EPrimBinaryOp::Greater, EExpression::var(1), EExpression::constant(2));
		let inner = ProjectStage::new(
			Box::new(FilterStage::new(one_row(), keep_big)),
			vec![(3, EExpression::var(1))],
		);
		let mut stage =
			TraverseStage::new(outer(serde_json::json!([1, 2, 3, 4])), Box::new(inner), 1, 2, 3, None, None, 1);
		assert_eq!(run(&mut stage), "[3, 4]");
	}

	#[test]
	fn folds_stop_when_finished() {
		let sum = EExpression::binary(EPrimBinaryOp::Add, EExpression::var(2), EExpression::var(3));
		let past_five = EExpression::binary(EPrimBinaryOp::Greater, EExpression::var(2), EExpression::constant(5));
		let inner = ProjectStage::new(one_row(), vec![(3, EExpression::var(1))]);
		let mut stage = TraverseStage::new(
			outer(serde_json::json!([1, [2, 3], 4, 5])),
			Box::new(inner),
			1,
			2,
			3,
			Some(sum),
			Some(past_five),
			2,
		);
		assert_eq!(run(&mut stage), "6");
	}
}
