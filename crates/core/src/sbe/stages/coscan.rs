use anyhow::Result;

use super::{PlanStage, PlanState};
use crate::sbe::ExecCtx;

/// Produces an unbounded sequence of empty rows. Bounded by a limit above it, it gives the
/// single row on which a projection is evaluated.
#[derive(Debug, Default)]
pub struct CoScanStage;

impl CoScanStage {
	pub fn new() -> Self {
		Self
	}
}

impl PlanStage for CoScanStage {
	fn name(&self) -> &'static str {
		"coscan"
	}

	fn open(&mut self, _ctx: &mut ExecCtx, _reopen: bool) -> Result<()> {
		Ok(())
	}

	fn get_next(&mut self, _ctx: &mut ExecCtx) -> Result<PlanState> {
		Ok(PlanState::Advanced)
	}

	fn close(&mut self, _ctx: &mut ExecCtx) {}
}
