use anyhow::Result;

use super::{BoxedStage, PlanStage, PlanState};
use crate::sbe::ExecCtx;

#[derive(Debug)]
pub struct LimitSkipStage {
	input: BoxedStage,
	limit: Option<u64>,
	skip: u64,
	returned: u64,
	skipped: bool,
}

impl LimitSkipStage {
	pub fn new(input: BoxedStage, limit: Option<u64>, skip: u64) -> Self {
		Self {
			input,
			limit,
			skip,
			returned: 0,
			skipped: false,
		}
	}
}

impl PlanStage for LimitSkipStage {
	fn name(&self) -> &'static str {
		"limit"
	}

	fn attrs(&self) -> Vec<(String, String)> {
		let limit = self.limit.map(|l| l.to_string()).unwrap_or_else(|| "none".to_string());
		vec![("limit".to_string(), limit), ("skip".to_string(), self.skip.to_string())]
	}

	fn children(&self) -> Vec<&dyn PlanStage> {
		vec![self.input.as_ref()]
	}

	fn open(&mut self, ctx: &mut ExecCtx, reopen: bool) -> Result<()> {
		self.returned = 0;
		self.skipped = false;
		self.input.open(ctx, reopen)
	}

	fn get_next(&mut self, ctx: &mut ExecCtx) -> Result<PlanState> {
		if !self.skipped {
			self.skipped = true;
			for _ in 0..self.skip {
				if self.input.get_next(ctx)? == PlanState::IsEof {
					return Ok(PlanState::IsEof);
				}
			}
		}
		if self.limit.is_some_and(|limit| self.returned >= limit) {
			return Ok(PlanState::IsEof);
		}
		let state = self.input.get_next(ctx)?;
		if state == PlanState::Advanced {
			self.returned += 1;
		}
		Ok(state)
	}

	fn close(&mut self, ctx: &mut ExecCtx) {
		self.input.close(ctx);
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;
	use crate::sbe::stages::{ValuesStage, collect_rows};
	use crate::val::Value;

	#[rstest]
	#[case::limit_only(Some(2), 0, vec![0, 1])]
	#[case::skip_only(None, 3, vec![3, 4])]
	#[case::both(Some(1), 2, vec![2])]
	#[case::skip_past_end(Some(4), 10, vec![])]
	fn windows(#[case] limit: Option<u64>, #[case] skip: u64, #[case] expected: Vec<i32>) {
		let rows = (0..5).map(|i| vec![Value::NumberInt32(i)]).collect();
		let mut stage = LimitSkipStage::new(Box::new(ValuesStage::new(vec![1], rows)), limit, skip);
		let mut ctx = ExecCtx::new();
		let out = collect_rows(&mut stage, &mut ctx, &[1]).unwrap();
		let got: Vec<String> = out.iter().map(|r| r[0].to_string()).collect();
		let expected: Vec<String> = expected.iter().map(|i| i.to_string()).collect();
		assert_eq!(got, expected);
	}
}
