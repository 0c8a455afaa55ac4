use anyhow::Result;

use super::{BoxedStage, PlanStage, PlanState};
use crate::sbe::{ExecCtx, SlotId};
use crate::val::{ArrayEnumerator, Value};

/// Produces one row per element of the array in `in_slot`, writing the element to `out_slot`
/// and its position to `index_slot`. With `preserve` set, rows whose value is not a non-empty
/// array pass through once with a null index.
#[derive(Debug)]
pub struct UnwindStage {
	input: BoxedStage,
	in_slot: SlotId,
	out_slot: SlotId,
	index_slot: SlotId,
	preserve: bool,
	pending: Vec<Value>,
	next: usize,
}

impl UnwindStage {
	pub fn new(input: BoxedStage, in_slot: SlotId, out_slot: SlotId, index_slot: SlotId, preserve: bool) -> Self {
		Self {
			input,
			in_slot,
			out_slot,
			index_slot,
			preserve,
			pending: Vec::new(),
			next: 0,
		}
	}
}

impl PlanStage for UnwindStage {
	fn name(&self) -> &'static str {
		"unwind"
	}

	fn attrs(&self) -> Vec<(String, String)> {
		vec![
			("in".to_string(), format!("s{}", self.in_slot)),
			("out".to_string(), format!("s{}", self.out_slot)),
			("index".to_string(), format!("s{}", self.index_slot)),
			("preserve".to_string(), self.preserve.to_string()),
		]
	}

	fn children(&self) -> Vec<&dyn PlanStage> {
		vec![self.input.as_ref()]
	}

	fn open(&mut self, ctx: &mut ExecCtx, reopen: bool) -> Result<()> {
		self.pending.clear();
		self.next = 0;
		self.input.open(ctx, reopen)
	}

	fn get_next(&mut self, ctx: &mut ExecCtx) -> Result<PlanState> {
		loop {
			if let Some(value) = self.pending.get(self.next) {
				ctx.set(self.out_slot, value.clone());
				ctx.set(self.index_slot, Value::NumberInt64(self.next as i64));
				self.next += 1;
				return Ok(PlanState::Advanced);
			}
			if self.input.get_next(ctx)? == PlanState::IsEof {
				return Ok(PlanState::IsEof);
			}
			self.pending.clear();
			self.next = 0;
			let input = ctx.get(self.in_slot);
			if input.tag().is_array() {
				let mut it = ArrayEnumerator::new(input);
				while !it.at_end() {
					self.pending.push(it.view().clone());
					it.advance();
				}
				if !self.pending.is_empty() {
					continue;
				}
				if self.preserve {
					ctx.set(self.out_slot, Value::Nothing);
					ctx.set(self.index_slot, Value::Null);
					return Ok(PlanState::Advanced);
				}
			} else if self.preserve || !input.is_null_or_missing() {
				let value = input.clone();
				ctx.set(self.out_slot, value);
				ctx.set(self.index_slot, Value::Null);
				return Ok(PlanState::Advanced);
			}
		}
	}

	fn close(&mut self, ctx: &mut ExecCtx) {
		self.pending.clear();
		self.input.close(ctx);
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;
	use crate::sbe::stages::{ValuesStage, collect_rows};
	use crate::val::json::from_json;

	#[rstest]
	#[case::flattens(false, vec!["1/0", "2/1", "5/null"])]
	#[case::preserves(true, vec!["1/0", "2/1", "Nothing/null", "null/null", "5/null"])]
	fn unwinds(#[case] preserve: bool, #[case] expected: Vec<&str>) {
		let rows = [serde_json::json!([1, 2]), serde_json::json!([]), serde_json::json!(null), serde_json::json!(5)]
			.iter()
			.map(|j| vec![from_json(j).unwrap()])
			.collect();
		let mut stage = UnwindStage::new(Box::new(ValuesStage::new(vec![1], rows)), 1, 2, 3, preserve);
		let mut ctx = ExecCtx::new();
		let out = collect_rows(&mut stage, &mut ctx, &[2, 3]).unwrap();
		let got: Vec<String> = out.iter().map(|r| format!("{}/{}", r[0], r[1])).collect();
		assert_eq!(got, expected);
	}
}
