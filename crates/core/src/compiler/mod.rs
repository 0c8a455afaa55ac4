//! The MQL expression compiler.
//!
//! An [`Expression`] is lowered into a pair of a scalar [`EExpression`] and the stage tree which
//! must run before that scalar can be evaluated. Operators whose operands are all evaluated
//! eagerly become scalar builtin calls. Operators which short-circuit, bind variables or iterate
//! arrays become sub-plans attached to the input stage.

mod context;
mod helpers;
mod leaf;
mod program;
mod visitor;
mod walker;

use anyhow::Result;

pub use self::context::{CompilerState, ExpressionVisitorContext};
pub use self::program::ExpressionProgram;
pub use self::walker::{ExpressionVisitor, walk};
use crate::expr::Expression;
use crate::sbe::stages::{PlanStage, explain as explain_stage};
use crate::sbe::{BoxedStage, EExpression, SlotId};

/// Compiles `expr` against documents held in `root_slot`, extending `stage`
pub fn generate_expression(
	state: &mut CompilerState,
	expr: &Expression,
	stage: BoxedStage,
	root_slot: SlotId,
) -> Result<(EExpression, BoxedStage)> {
	let mut ctx = ExpressionVisitorContext::new(state, stage, root_slot);
	walk(expr, &mut ctx)?;
	let (compiled, stage) = ctx.done()?;
	trace!(target: "sbe::compiler", expr = %compiled, "compiled expression");
	Ok((compiled, stage))
}

/// Renders a compiled expression and the stage tree it runs over
pub fn explain(expr: &EExpression, stage: &dyn PlanStage) -> String {
	format!("expr: {expr}\n{}", explain_stage(stage))
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::expr::parse_expression;
	use crate::sbe::stages::CoScanStage;

	#[test]
	fn eager_operators_need_no_sub_plan() {
		let mut state = CompilerState::new(None).unwrap();
		let root = state.slots.generate();
		let expr = parse_expression(&json!({"$abs": "$a"})).unwrap();
		let (_, stage) = generate_expression(&mut state, &expr, Box::new(CoScanStage::new()), root).unwrap();
		assert_eq!(stage.name(), "coscan");
	}

	#[test]
	fn lazy_operators_attach_a_join() {
		let mut state = CompilerState::new(None).unwrap();
		let root = state.slots.generate();
		let expr = parse_expression(&json!({"$cond": [true, "$a", "$b"]})).unwrap();
		let (compiled, stage) = generate_expression(&mut state, &expr, Box::new(CoScanStage::new()), root).unwrap();
		assert_eq!(stage.name(), "nlj");
		let plan = explain(&compiled, stage.as_ref());
		assert!(plan.starts_with("expr: s"), "{plan}");
		assert!(plan.contains("union"), "{plan}");
	}
}
