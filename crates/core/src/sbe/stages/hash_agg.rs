use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use super::{BoxedStage, PlanStage, PlanState, slot_list};
use crate::sbe::{EExpression, ExecCtx, SlotId, vm};
use crate::val::{Collator, Value, hash_value, three_way};

/// Groups its input on the `group_by` slots and folds each group through the aggregate
/// expressions. All input is consumed when the stage is opened; groups come out in the order
/// they were first seen.
///
/// Aggregate expressions read their running state through the accumulator of the context, so
/// `sum(s3)` adds the current row's `s3` to the group's total.
#[derive(Debug)]
pub struct HashAggStage {
	input: BoxedStage,
	group_by: Vec<SlotId>,
	aggs: Vec<(SlotId, EExpression)>,
	collator: Option<Arc<dyn Collator>>,
	groups: Vec<(Vec<Value>, Vec<Value>)>,
	pos: usize,
}

impl HashAggStage {
	pub fn new(
		input: BoxedStage,
		group_by: Vec<SlotId>,
		aggs: Vec<(SlotId, EExpression)>,
		collator: Option<Arc<dyn Collator>>,
	) -> Self {
		Self {
			input,
			group_by,
			aggs,
			collator,
			groups: Vec::new(),
			pos: 0,
		}
	}

	fn keys_equal(&self, lhs: &[Value], rhs: &[Value]) -> bool {
		let collator = self.collator.as_deref();
		lhs.iter().zip(rhs).all(|(l, r)| three_way(l, r, collator) == Some(Ordering::Equal))
	}
}

impl PlanStage for HashAggStage {
	fn name(&self) -> &'static str {
		"group"
	}

	fn attrs(&self) -> Vec<(String, String)> {
		let mut attrs = vec![("groupBy".to_string(), slot_list(&self.group_by))];
		for (slot, expr) in &self.aggs {
			attrs.push((format!("s{slot}"), expr.to_string()));
		}
		attrs
	}

	fn children(&self) -> Vec<&dyn PlanStage> {
		vec![self.input.as_ref()]
	}

	fn open(&mut self, ctx: &mut ExecCtx, reopen: bool) -> Result<()> {
		trace!(target: "sbe::stages", reopen, "opening hash aggregation");
		self.groups.clear();
		self.pos = 0;
		let mut index: HashMap<u64, Vec<usize>, ahash::RandomState> = HashMap::default();
		self.input.open(ctx, reopen)?;
		while self.input.get_next(ctx)? == PlanState::Advanced {
			let key: Vec<Value> = self.group_by.iter().map(|s| ctx.get(*s).clone()).collect();
			let collator = self.collator.as_deref();
			let hash = key.iter().fold(0u64, |h, v| h.rotate_left(5) ^ hash_value(v, collator));
			let found = index
				.get(&hash)
				.and_then(|bucket| bucket.iter().copied().find(|&i| self.keys_equal(&self.groups[i].0, &key)));
			let idx = match found {
				Some(idx) => idx,
				None => {
					let idx = self.groups.len();
					self.groups.push((key, vec![Value::Nothing; self.aggs.len()]));
					index.entry(hash).or_default().push(idx);
					idx
				}
			};
			for (i, (_, expr)) in self.aggs.iter().enumerate() {
				let prev = std::mem::take(&mut self.groups[idx].1[i]);
				ctx.set_accumulator(prev);
				let next = vm::eval(expr, ctx);
				ctx.take_accumulator();
				self.groups[idx].1[i] = next?;
			}
		}
		self.input.close(ctx);
		trace!(target: "sbe::stages", groups = self.groups.len(), "hash aggregation consumed its input");
		Ok(())
	}

	fn get_next(&mut self, ctx: &mut ExecCtx) -> Result<PlanState> {
		let Some((key, states)) = self.groups.get(self.pos) else {
			return Ok(PlanState::IsEof);
		};
		for (slot, value) in self.group_by.iter().zip(key) {
			ctx.set(*slot, value.clone());
		}
		for ((slot, _), value) in self.aggs.iter().zip(states) {
			ctx.set(*slot, value.clone());
		}
		self.pos += 1;
		Ok(PlanState::Advanced)
	}

	fn close(&mut self, _ctx: &mut ExecCtx) {
		trace!(target: "sbe::stages", "closing hash aggregation");
		self.groups.clear();
	}
}
