use anyhow::Result;

use super::{BoxedStage, PlanStage, PlanState, slot_list};
use crate::sbe::{ExecCtx, SlotId};

/// Concatenates its children. Children are opened lazily, one at a time, and each row's
/// `inputs[i]` slots are copied to `outputs`.
#[derive(Debug)]
pub struct UnionStage {
	children: Vec<BoxedStage>,
	inputs: Vec<Vec<SlotId>>,
	outputs: Vec<SlotId>,
	current: usize,
	current_open: bool,
	opened: Vec<bool>,
}

impl UnionStage {
	pub fn new(children: Vec<BoxedStage>, inputs: Vec<Vec<SlotId>>, outputs: Vec<SlotId>) -> Result<Self> {
		tassert!(children.len() == inputs.len(), 5611600, "union needs one slot vector per child");
		tassert!(
			inputs.iter().all(|slots| slots.len() == outputs.len()),
			5611601,
			"union input slot vectors must match its outputs"
		);
		let opened = vec![false; children.len()];
		Ok(Self {
			children,
			inputs,
			outputs,
			current: 0,
			current_open: false,
			opened,
		})
	}

	fn open_current(&mut self, ctx: &mut ExecCtx) -> Result<()> {
		if let Some(child) = self.children.get_mut(self.current) {
			child.open(ctx, self.opened[self.current])?;
			self.opened[self.current] = true;
			self.current_open = true;
		}
		Ok(())
	}

	fn close_current(&mut self, ctx: &mut ExecCtx) {
		if self.current_open {
			if let Some(child) = self.children.get_mut(self.current) {
				child.close(ctx);
			}
			self.current_open = false;
		}
	}
}

impl PlanStage for UnionStage {
	fn name(&self) -> &'static str {
		"union"
	}

	fn attrs(&self) -> Vec<(String, String)> {
		let inputs: Vec<String> = self.inputs.iter().map(|s| slot_list(s)).collect();
		vec![
			("outputs".to_string(), slot_list(&self.outputs)),
			("inputs".to_string(), format!("[{}]", inputs.join(", "))),
		]
	}

	fn children(&self) -> Vec<&dyn PlanStage> {
		self.children.iter().map(|c| c.as_ref()).collect()
	}

	fn open(&mut self, ctx: &mut ExecCtx, _reopen: bool) -> Result<()> {
		trace!(target: "sbe::stages", branches = self.children.len(), "opening union");
		self.close_current(ctx);
		self.current = 0;
		self.open_current(ctx)
	}

	fn get_next(&mut self, ctx: &mut ExecCtx) -> Result<PlanState> {
		while let Some(child) = self.children.get_mut(self.current) {
			if child.get_next(ctx)? == PlanState::Advanced {
				for (input, output) in self.inputs[self.current].iter().zip(&self.outputs) {
					let value = ctx.get(*input).clone();
					ctx.set(*output, value);
				}
				return Ok(PlanState::Advanced);
			}
			self.close_current(ctx);
			self.current += 1;
			self.open_current(ctx)?;
		}
		Ok(PlanState::IsEof)
	}

	fn close(&mut self, ctx: &mut ExecCtx) {
		trace!(target: "sbe::stages", "closing union");
		self.close_current(ctx);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sbe::EExpression;
	use crate::sbe::stages::{FilterStage, LimitSkipStage, ValuesStage, collect_rows};
	use crate::val::Value;

	fn values(slot: SlotId, items: &[i32]) -> BoxedStage {
		Box::new(ValuesStage::new(vec![slot], items.iter().map(|i| vec![Value::NumberInt32(*i)]).collect()))
	}

	#[test]
	fn concatenates_in_order() {
		let mut stage = UnionStage::new(vec![values(1, &[1, 2]), values(2, &[3])], vec![vec![1], vec![2]], vec![5]).unwrap();
		let mut ctx = ExecCtx::new();
		let rows = collect_rows(&mut stage, &mut ctx, &[5]).unwrap();
		assert_eq!(rows.iter().map(|r| r[0].to_string()).collect::<Vec<_>>(), ["1", "2", "3"]);
	}

	#[test]
	fn later_branches_stay_closed_under_a_limit() {
		// The second branch would fail if it were ever opened
		let failing = FilterStage::constant(values(2, &[9]), EExpression::fail(1, "opened"));
		let union = UnionStage::new(vec![values(1, &[1]), Box::new(failing)], vec![vec![1], vec![2]], vec![5]).unwrap();
		let mut stage = LimitSkipStage::new(Box::new(union), Some(1), 0);
		let mut ctx = ExecCtx::new();
		let rows = collect_rows(&mut stage, &mut ctx, &[5]).unwrap();
		assert_eq!(rows.len(), 1);
	}

	#[test]
	fn mismatched_slot_vectors_are_rejected() {
		assert!(UnionStage::new(vec![values(1, &[1])], vec![], vec![5]).is_err());
	}
}
