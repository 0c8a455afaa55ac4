use anyhow::Result;

use super::{PlanStage, PlanState, slot_list};
use crate::sbe::{ExecCtx, SlotId};
use crate::val::Value;

/// Scans a fixed set of rows, writing each into `slots`
#[derive(Debug)]
pub struct ValuesStage {
	slots: Vec<SlotId>,
	rows: Vec<Vec<Value>>,
	pos: usize,
}

impl ValuesStage {
	pub fn new(slots: Vec<SlotId>, rows: Vec<Vec<Value>>) -> Self {
		Self {
			slots,
			rows,
			pos: 0,
		}
	}
}

impl PlanStage for ValuesStage {
	fn name(&self) -> &'static str {
		"virtualscan"
	}

	fn attrs(&self) -> Vec<(String, String)> {
		vec![
			("slots".to_string(), slot_list(&self.slots)),
			("rows".to_string(), self.rows.len().to_string()),
		]
	}

	fn open(&mut self, _ctx: &mut ExecCtx, _reopen: bool) -> Result<()> {
		self.pos = 0;
		Ok(())
	}

	fn get_next(&mut self, ctx: &mut ExecCtx) -> Result<PlanState> {
		let Some(row) = self.rows.get(self.pos) else {
			return Ok(PlanState::IsEof);
		};
		for (slot, value) in self.slots.iter().zip(row) {
			ctx.set(*slot, value.clone());
		}
		self.pos += 1;
		Ok(PlanState::Advanced)
	}

	fn close(&mut self, _ctx: &mut ExecCtx) {}
}
