use std::sync::Arc;

use anyhow::Result;

use super::context::one_row;
use super::{CompilerState, generate_expression};
use crate::expr::Expression;
use crate::sbe::stages::PlanStage;
use crate::sbe::{BoxedStage, EExpression, ExecCtx, PlanState, SlotId, vm};
use crate::val::{Collator, Value};

/// A compiled expression ready to be evaluated against one document at a time
#[derive(Debug)]
pub struct ExpressionProgram {
	state: CompilerState,
	root_slot: SlotId,
	expr: EExpression,
	stage: BoxedStage,
	ctx: ExecCtx,
	opened: bool,
}

impl ExpressionProgram {
	pub fn compile(expr: &Expression, collator: Option<Arc<dyn Collator>>) -> Result<Self> {
		let mut state = CompilerState::new(collator)?;
		let root_slot = state.slots.generate();
		let (compiled, stage) = generate_expression(&mut state, expr, one_row(), root_slot)?;
		let ctx = ExecCtx::from_env(&state.env);
		Ok(Self {
			state,
			root_slot,
			expr: compiled,
			stage,
			ctx,
			opened: false,
		})
	}

	/// Evaluates the expression with `doc` as `$$ROOT`
	pub fn eval(&mut self, doc: Value) -> Result<Value> {
		self.ctx.set(self.root_slot, doc);
		self.stage.open(&mut self.ctx, self.opened)?;
		self.opened = true;
		let result = match self.stage.get_next(&mut self.ctx) {
			Ok(PlanState::Advanced) => vm::eval(&self.expr, &mut self.ctx),
			Ok(PlanState::IsEof) => Ok(Value::Nothing),
			Err(e) => Err(e),
		};
		self.stage.close(&mut self.ctx);
		result
	}

	pub fn expr(&self) -> &EExpression {
		&self.expr
	}

	pub fn stage(&self) -> &dyn PlanStage {
		self.stage.as_ref()
	}

	pub fn state(&self) -> &CompilerState {
		&self.state
	}

	pub fn explain(&self) -> String {
		super::explain(&self.expr, self.stage.as_ref())
	}
}

#[cfg(test)]
mod tests {
	use serde_json::{Value as Json, json};
	use test_log::test;

	use super::*;
	use crate::err::code_of;
	use crate::expr::parse_expression;
	use crate::val::json::from_json;

	fn program(expr: Json) -> ExpressionProgram {
		ExpressionProgram::compile(&parse_expression(&expr).unwrap(), None).unwrap()
	}

	fn run(expr: Json, doc: Json) -> Result<Value> {
		program(expr).eval(from_json(&doc).unwrap())
	}

	#[test]
	fn add_fields() {
		let mut add = program(json!({"$add": ["$a", "$b"]}));
		let five = add.eval(from_json(&json!({"a": 2, "b": 3})).unwrap()).unwrap();
		assert!(matches!(five, Value::NumberInt32(5)));
		let err = add.eval(from_json(&json!({"a": 2, "b": "x"})).unwrap()).unwrap_err();
		assert_eq!(code_of(&err), Some(4974201));
		let null = add.eval(from_json(&json!({"a": null, "b": 3})).unwrap()).unwrap();
		assert!(matches!(null, Value::Null));
	}

	#[test]
	fn filter_keeps_matching_elements() {
		let expr = json!({"$filter": {"input": "$arr", "cond": {"$gt": ["$$this", 2]}}});
		let mut filter = program(expr);
		let kept = filter.eval(from_json(&json!({"arr": [1, 2, 3, 4]})).unwrap()).unwrap();
		assert_eq!(kept.to_string(), "[3, 4]");
		let null = filter.eval(from_json(&json!({"arr": null})).unwrap()).unwrap();
		assert!(matches!(null, Value::Null));
		let err = filter.eval(from_json(&json!({"arr": "notarray"})).unwrap()).unwrap_err();
		assert_eq!(code_of(&err), Some(5073201));
	}

	#[test]
	fn programs_can_be_reused() {
		let mut cond = program(json!({"$cond": [{"$gt": ["$x", 0]}, "pos", "neg"]}));
		for (x, expected) in [(1, "\"pos\""), (-1, "\"neg\""), (5, "\"pos\"")] {
			let result = cond.eval(from_json(&json!({ "x": x })).unwrap()).unwrap();
			assert_eq!(result.to_string(), expected);
		}
	}

	#[test]
	fn and_stops_at_first_false() {
		// The second operand would fail if it were evaluated
		let result = run(json!({"$and": [false, {"$abs": "x"}]}), json!({})).unwrap();
		assert_eq!(result.to_string(), "false");
		let err = run(json!({"$and": [true, {"$abs": "x"}]}), json!({})).unwrap_err();
		assert_eq!(code_of(&err), Some(4903700));
	}

	#[test]
	fn nested_paths_traverse_arrays() {
		let result = run(json!("$a.b"), json!({"a": [{"b": 1}, {"b": 2}, {"c": 3}]})).unwrap();
		assert_eq!(result.to_string(), "[1, 2]");
	}

	#[test]
	fn let_binds_in_order() {
		let expr = json!({"$let": {"vars": {"x": "$a"}, "in": {"$multiply": ["$$x", 2]}}});
		assert_eq!(run(expr, json!({"a": 4})).unwrap().to_string(), "8");
	}

	#[test]
	fn explain_shows_expression_and_plan() {
		let plan = program(json!({"$ifNull": ["$a", 1]})).explain();
		assert!(plan.starts_with("expr: "), "{plan}");
		assert!(plan.contains("nlj"), "{plan}");
	}
}
