use anyhow::Result;
use clap::Args;
use sbe_core::compiler::ExpressionProgram;
use sbe_core::expr::parse_expression;
use sbe_core::val::json::{from_json, to_json};
use serde_json::Value as Json;

use crate::cli::validator::json_valid;
use crate::cnf::LOG;

#[derive(Args, Debug)]
pub struct EvalCommandArguments {
	#[arg(help = "The aggregation expression to evaluate, as JSON")]
	#[arg(index = 1, value_parser = json_valid)]
	expr: Json,
	#[arg(help = "The document the expression is evaluated against")]
	#[arg(short = 'd', long = "doc", default_value = "{}", value_parser = json_valid)]
	doc: Json,
}

pub fn init(
	EvalCommandArguments {
		expr,
		doc,
	}: EvalCommandArguments,
) -> Result<()> {
	let expr = parse_expression(&expr)?;
	let mut program = ExpressionProgram::compile(&expr, None)?;
	trace!(target: LOG, ?expr, "compiled the expression");
	let result = program.eval(from_json(&doc)?)?;
	// A missing result prints as nothing at all
	if result.is_nothing() {
		return Ok(());
	}
	println!("{}", to_json(&result)?);
	Ok(())
}
