//! Evaluation-stage primitives.
//!
//! Every stage is a pull-based iterator over rows of slots. `open` prepares a stage (and its
//! children) for iteration, `get_next` advances it by one row, writing that row's outputs into
//! the [`ExecCtx`], and `close` releases whatever `open` acquired. A stage may be reopened after
//! it has been closed: correlated inner sides of a [`LoopJoinStage`] or [`TraverseStage`] are
//! reopened once per outer row.

mod branch;
mod coscan;
mod filter;
mod hash_agg;
mod limit_skip;
mod loop_join;
mod project;
mod traverse;
mod union;
mod unwind;
mod values;

use std::fmt::{Debug, Write};

use anyhow::Result;

pub use self::branch::BranchStage;
pub use self::coscan::CoScanStage;
pub use self::filter::{FilterKind, FilterStage};
pub use self::hash_agg::HashAggStage;
pub use self::limit_skip::LimitSkipStage;
pub use self::loop_join::LoopJoinStage;
pub use self::project::ProjectStage;
pub use self::traverse::TraverseStage;
pub use self::union::UnionStage;
pub use self::unwind::UnwindStage;
pub use self::values::ValuesStage;
use super::{ExecCtx, SlotId};

/// The number of spaces each level of an explained plan is indented by
const INDENT_WIDTH: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanState {
	Advanced,
	IsEof,
}

pub type BoxedStage = Box<dyn PlanStage>;

pub trait PlanStage: Debug + Send {
	/// The name of this stage, as shown in an explain tree
	fn name(&self) -> &'static str;

	/// Stage-specific properties for explain output
	fn attrs(&self) -> Vec<(String, String)> {
		vec![]
	}

	fn children(&self) -> Vec<&dyn PlanStage> {
		vec![]
	}

	fn open(&mut self, ctx: &mut ExecCtx, reopen: bool) -> Result<()>;

	fn get_next(&mut self, ctx: &mut ExecCtx) -> Result<PlanState>;

	fn close(&mut self, ctx: &mut ExecCtx);
}

pub(crate) fn slot_list(slots: &[SlotId]) -> String {
	let names: Vec<String> = slots.iter().map(|s| format!("s{s}")).collect();
	format!("[{}]", names.join(", "))
}

/// Renders a stage tree as indented text, one stage per line
pub fn explain(stage: &dyn PlanStage) -> String {
	let mut output = String::new();
	format_stage(stage, &mut output, "");
	output
}

fn format_stage(stage: &dyn PlanStage, output: &mut String, prefix: &str) {
	let _ = write!(output, "{}", stage.name());
	let attrs = stage.attrs();
	if !attrs.is_empty() {
		let _ = write!(output, " [");
		for (i, (key, value)) in attrs.iter().enumerate() {
			if i > 0 {
				let _ = write!(output, ", ");
			}
			let _ = write!(output, "{key}: {value}");
		}
		let _ = write!(output, "]");
	}
	let _ = writeln!(output);
	let children = stage.children();
	if !children.is_empty() {
		let child_prefix = format!("{}{:width$}", prefix, "", width = INDENT_WIDTH);
		for child in children {
			let _ = write!(output, "{child_prefix}");
			format_stage(child, output, &child_prefix);
		}
	}
}

/// Runs a stage to completion, collecting the given slots from every row
pub fn collect_rows(stage: &mut dyn PlanStage, ctx: &mut ExecCtx, slots: &[SlotId]) -> Result<Vec<Vec<crate::val::Value>>> {
	stage.open(ctx, false)?;
	let mut rows = Vec::new();
	while stage.get_next(ctx)? == PlanState::Advanced {
		rows.push(slots.iter().map(|s| ctx.get(*s).clone()).collect());
	}
	stage.close(ctx);
	Ok(rows)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sbe::EExpression;

	#[test]
	fn explain_indents_children() {
		let stage = ProjectStage::new(
			Box::new(LimitSkipStage::new(Box::new(CoScanStage::new()), Some(1), 0)),
			vec![(3, EExpression::constant(1i64))],
		);
		assert_eq!(explain(&stage), "project [s3: 1L]\n    limit [limit: 1, skip: 0]\n        coscan\n");
	}

	#[test]
	fn rows_are_collected() {
		let mut ctx = ExecCtx::new();
		let mut stage = ProjectStage::new(
			Box::new(LimitSkipStage::new(Box::new(CoScanStage::new()), Some(2), 0)),
			vec![(1, EExpression::constant(7))],
		);
		let rows = collect_rows(&mut stage, &mut ctx, &[1]).unwrap();
		assert_eq!(rows.len(), 2);
		assert_eq!(rows[1][0].to_string(), "7");
	}
}
