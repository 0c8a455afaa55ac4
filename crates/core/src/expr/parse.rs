//! Parsing MQL expressions out of JSON.
//!
//! Variables are resolved while parsing. Each `$let` or `$filter` binding receives a fresh
//! [`VariableId`], and references are matched against the innermost enclosing binding of that
//! name, so scoping is static.

use anyhow::{Result, bail};
use serde_json::{Map, Value as Json};

use super::{
	CmpOp, DatePart, ExprKind, Expression, FieldPath, IndexUnit, PathRoot, RegexOp, SetOp, TrigOp,
	VariableId,
};
use crate::err::Error;
use crate::val::json::from_json;
use crate::val::{Array, Value};

/// Extended JSON wrappers, which denote constants rather than operators
const EXTENDED_JSON_KEYS: &[&str] = &[
	"$oid",
	"$date",
	"$numberLong",
	"$numberDecimal",
	"$numberInt",
	"$numberDouble",
	"$binary",
	"$regularExpression",
	"$timestamp",
	"$minKey",
	"$maxKey",
	"$undefined",
	"$symbol",
	"$code",
	"$uuid",
];

/// System variables which are resolved against the runtime environment
const SYSTEM_VARIABLES: &[&str] =
	&["NOW", "CLUSTER_TIME", "USER_ROLES", "SEARCH_META", "JS_SCOPE", "IS_MR"];

/// Operators which exist in MQL but have no compiled form
const UNSUPPORTED_OPERATORS: &[&str] = &[
	"$accumulator",
	"$allElementsTrue",
	"$anyElementTrue",
	"$arrayToObject",
	"$binarySize",
	"$convert",
	"$dateFromParts",
	"$dateFromString",
	"$dateToParts",
	"$dateToString",
	"$dateTrunc",
	"$function",
	"$getField",
	"$hour",
	"$in",
	"$indexOfArray",
	"$isoDayOfWeek",
	"$isoWeek",
	"$isoWeekYear",
	"$ltrim",
	"$map",
	"$meta",
	"$mergeObjects",
	"$millisecond",
	"$minute",
	"$month",
	"$objectToArray",
	"$pow",
	"$rand",
	"$range",
	"$reduce",
	"$replaceAll",
	"$round",
	"$rtrim",
	"$second",
	"$setEquals",
	"$setField",
	"$setIsSubset",
	"$size",
	"$slice",
	"$strLenBytes",
	"$strLenCP",
	"$strcasecmp",
	"$substr",
	"$substrBytes",
	"$substrCP",
	"$subtract",
	"$toBool",
	"$toDate",
	"$toDecimal",
	"$toDouble",
	"$toInt",
	"$toLong",
	"$toObjectId",
	"$toString",
	"$trim",
	"$trunc",
	"$type",
	"$week",
	"$year",
	"$zip",
];

fn parse_error(message: impl Into<String>) -> anyhow::Error {
	anyhow::Error::new(Error::FailedToParse(message.into()))
}

/// Parses a single expression with a fresh variable scope
pub fn parse_expression(json: &Json) -> Result<Expression> {
	Parser::new().parse(json)
}

#[derive(Debug, Default)]
pub struct Parser {
	scopes: Vec<(String, VariableId)>,
	next_id: VariableId,
}

impl Parser {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn parse(&mut self, json: &Json) -> Result<Expression> {
		match json {
			Json::String(s) if s.starts_with('$') => self.parse_path(s),
			Json::Array(items) => {
				let children = items.iter().map(|item| self.parse(item)).collect::<Result<Vec<_>>>()?;
				Ok(fold_array_literal(children))
			}
			Json::Object(map) => self.parse_object(map),
			other => Ok(Expression::constant(from_json(other)?)),
		}
	}

	fn define(&mut self, name: &str) -> Result<VariableId> {
		let valid = name.chars().next().is_some_and(|c| c.is_ascii_lowercase() || !c.is_ascii())
			&& name.chars().all(|c| c.is_alphanumeric() || c == '_');
		if !valid {
			bail!(Error::fail(16867, format!("'{name}' starts with an invalid character for a user variable name")));
		}
		self.next_id += 1;
		self.scopes.push((name.to_string(), self.next_id));
		Ok(self.next_id)
	}

	fn pop_scope(&mut self, count: usize) {
		let keep = self.scopes.len().saturating_sub(count);
		self.scopes.truncate(keep);
	}

	fn parse_path(&mut self, raw: &str) -> Result<Expression> {
		let (root, rest) = match raw.strip_prefix("$$") {
			Some(variable) => {
				let mut parts = variable.splitn(2, '.');
				let name = parts.next().unwrap_or_default();
				let root = match name {
					"ROOT" => PathRoot::Root,
					"CURRENT" => PathRoot::Current,
					"REMOVE" => PathRoot::Remove,
					"" => bail!(parse_error("empty variable names are not allowed")),
					_ if SYSTEM_VARIABLES.contains(&name) => PathRoot::System(name.to_string()),
					_ => match self.scopes.iter().rev().find(|(n, _)| n == name) {
						Some((_, id)) => PathRoot::User {
							id: *id,
							name: name.to_string(),
						},
						None => bail!(Error::UndefinedVariable(name.to_string())),
					},
				};
				(root, parts.next())
			}
			None => (PathRoot::Current, Some(&raw[1..])),
		};
		let fields = match rest {
			Some(rest) => {
				let fields: Vec<String> = rest.split('.').map(str::to_string).collect();
				if fields.iter().any(|f| f.is_empty()) {
					bail!(Error::fail(15998, format!("FieldPath field names may not be empty strings: '{raw}'")));
				}
				fields
			}
			None => vec![],
		};
		Ok(Expression::new(
			ExprKind::FieldPath(FieldPath {
				root,
				fields,
			}),
			vec![],
		))
	}

	fn parse_object(&mut self, map: &Map<String, Json>) -> Result<Expression> {
		let Some((first, _)) = map.iter().next() else {
			return Ok(Expression::constant(Value::new_object()));
		};
		if !first.starts_with('$') {
			let mut names = Vec::with_capacity(map.len());
			let mut children = Vec::with_capacity(map.len());
			for (name, value) in map {
				if name.starts_with('$') {
					bail!(Error::fail(16412, format!("field path references must be prefixed with a '$' ('{name}')")));
				}
				names.push(name.clone());
				children.push(self.parse(value)?);
			}
			return Ok(Expression::new(ExprKind::ObjectLiteral(names), children));
		}
		if EXTENDED_JSON_KEYS.contains(&first.as_str()) {
			return Ok(Expression::constant(from_json(&Json::Object(map.clone()))?));
		}
		if map.len() != 1 {
			bail!(Error::fail(
				15983,
				format!(
					"an expression specification must contain exactly one field, the name of the expression. Found {} fields",
					map.len()
				)
			));
		}
		let Some((op, args)) = map.iter().next() else {
			return Ok(Expression::constant(Value::new_object()));
		};
		self.parse_operator(op, args)
	}

	fn operands(&mut self, args: &Json) -> Result<Vec<Expression>> {
		match args {
			Json::Array(items) => items.iter().map(|item| self.parse(item)).collect(),
			other => Ok(vec![self.parse(other)?]),
		}
	}

	fn exactly(&mut self, op: &str, args: &Json, count: usize) -> Result<Vec<Expression>> {
		let operands = self.operands(args)?;
		if operands.len() != count {
			bail!(Error::fail(
				16020,
				format!("Expression {op} takes exactly {count} arguments. {} were passed in.", operands.len())
			));
		}
		Ok(operands)
	}

	fn between(&mut self, op: &str, args: &Json, min: usize, max: usize) -> Result<Vec<Expression>> {
		let operands = self.operands(args)?;
		if operands.len() < min || operands.len() > max {
			bail!(Error::fail(16021, format!("Expression {op} takes at least {min} arguments, and at most {max}")));
		}
		Ok(operands)
	}

	fn parse_operator(&mut self, op: &str, args: &Json) -> Result<Expression> {
		let unary = |kind: ExprKind, this: &mut Self| -> Result<Expression> {
			let children = this.exactly(op, args, 1)?;
			Ok(Expression::new(kind, children))
		};
		let binary = |kind: ExprKind, this: &mut Self| -> Result<Expression> {
			let children = this.exactly(op, args, 2)?;
			Ok(Expression::new(kind, children))
		};
		let variadic = |kind: ExprKind, this: &mut Self| -> Result<Expression> {
			let children = this.operands(args)?;
			Ok(Expression::new(kind, children))
		};
		match op {
			"$literal" => Ok(Expression::constant(from_json(args)?)),
			"$abs" => unary(ExprKind::Abs, self),
			"$add" => variadic(ExprKind::Add, self),
			"$ceil" => unary(ExprKind::Ceil, self),
			"$divide" => binary(ExprKind::Divide, self),
			"$exp" => unary(ExprKind::Exp, self),
			"$floor" => unary(ExprKind::Floor, self),
			"$ln" => unary(ExprKind::Ln, self),
			"$log10" => unary(ExprKind::Log10, self),
			"$mod" => binary(ExprKind::Mod, self),
			"$multiply" => variadic(ExprKind::Multiply, self),
			"$sqrt" => unary(ExprKind::Sqrt, self),
			"$arrayElemAt" => binary(ExprKind::ArrayElemAt, self),
			"$first" => unary(ExprKind::First, self),
			"$last" => unary(ExprKind::Last, self),
			"$concatArrays" => variadic(ExprKind::ConcatArrays, self),
			"$isArray" => unary(ExprKind::IsArray, self),
			"$reverseArray" => unary(ExprKind::ReverseArray, self),
			"$bsonSize" => unary(ExprKind::BsonSize, self),
			"$and" => variadic(ExprKind::And, self),
			"$or" => variadic(ExprKind::Or, self),
			"$not" => unary(ExprKind::Not, self),
			"$ifNull" => {
				let children = self.operands(args)?;
				if children.len() < 2 {
					bail!(Error::fail(1257300, "$ifNull needs at least two arguments"));
				}
				Ok(Expression::new(ExprKind::IfNull, children))
			}
			"$eq" => binary(ExprKind::Compare(CmpOp::Eq), self),
			"$ne" => binary(ExprKind::Compare(CmpOp::Ne), self),
			"$gt" => binary(ExprKind::Compare(CmpOp::Gt), self),
			"$gte" => binary(ExprKind::Compare(CmpOp::Gte), self),
			"$lt" => binary(ExprKind::Compare(CmpOp::Lt), self),
			"$lte" => binary(ExprKind::Compare(CmpOp::Lte), self),
			"$cmp" => binary(ExprKind::Compare(CmpOp::Cmp), self),
			"$concat" => variadic(ExprKind::Concat, self),
			"$indexOfBytes" | "$indexOfCP" => {
				let children = self.between(op, args, 2, 4)?;
				let unit = if op == "$indexOfBytes" {
					IndexUnit::Bytes
				} else {
					IndexUnit::CodePoints
				};
				let kind = ExprKind::IndexOf {
					unit,
					has_start: children.len() > 2,
					has_end: children.len() > 3,
				};
				Ok(Expression::new(kind, children))
			}
			"$split" => binary(ExprKind::Split, self),
			"$toLower" => unary(ExprKind::ToLower, self),
			"$toUpper" => unary(ExprKind::ToUpper, self),
			"$isNumber" => unary(ExprKind::IsNumber, self),
			"$setUnion" => variadic(ExprKind::SetOp(SetOp::Union), self),
			"$setIntersection" => variadic(ExprKind::SetOp(SetOp::Intersection), self),
			"$setDifference" => binary(ExprKind::SetOp(SetOp::Difference), self),
			"$atan2" => binary(ExprKind::Atan2, self),
			"$cond" => self.parse_cond(args),
			"$switch" => self.parse_switch(args),
			"$let" => self.parse_let(args),
			"$filter" => self.parse_filter(args),
			"$replaceOne" => {
				let map = named_args(op, args, &["input", "find", "replacement"])?;
				let children = self.required(op, &map, &["input", "find", "replacement"])?;
				Ok(Expression::new(ExprKind::ReplaceOne, children))
			}
			"$dayOfMonth" => self.parse_date_part(op, DatePart::DayOfMonth, args),
			"$dayOfWeek" => self.parse_date_part(op, DatePart::DayOfWeek, args),
			"$dayOfYear" => self.parse_date_part(op, DatePart::DayOfYear, args),
			"$dateDiff" => {
				let map = named_args(op, args, &["startDate", "endDate", "unit", "timezone", "startOfWeek"])?;
				let mut children = self.required(op, &map, &["startDate", "endDate", "unit"])?;
				let timezone = self.optional(&map, "timezone", &mut children)?;
				let start_of_week = self.optional(&map, "startOfWeek", &mut children)?;
				let kind = ExprKind::DateDiff {
					has_timezone: timezone,
					has_start_of_week: start_of_week,
				};
				Ok(Expression::new(kind, children))
			}
			"$dateAdd" | "$dateSubtract" => {
				let map = named_args(op, args, &["startDate", "unit", "amount", "timezone"])?;
				let mut children = self.required(op, &map, &["startDate", "unit", "amount"])?;
				let timezone = self.optional(&map, "timezone", &mut children)?;
				let kind = ExprKind::DateAdd {
					subtract: op == "$dateSubtract",
					has_timezone: timezone,
				};
				Ok(Expression::new(kind, children))
			}
			"$regexMatch" | "$regexFind" | "$regexFindAll" => {
				let regex_op = match op {
					"$regexMatch" => RegexOp::Match,
					"$regexFind" => RegexOp::Find,
					_ => RegexOp::FindAll,
				};
				let map = named_args(op, args, &["input", "regex", "options"])?;
				let mut children = self.required(op, &map, &["input", "regex"])?;
				let options = self.optional(&map, "options", &mut children)?;
				let kind = ExprKind::Regex {
					op: regex_op,
					has_options: options,
				};
				Ok(Expression::new(kind, children))
			}
			_ => {
				if let Some(trig) = trig_op(op) {
					return unary(ExprKind::Trig(trig), self);
				}
				if UNSUPPORTED_OPERATORS.contains(&op) {
					let children = match args {
						Json::Object(_) => vec![],
						other => self.operands(other)?,
					};
					return Ok(Expression::new(ExprKind::Unsupported(op.to_string()), children));
				}
				bail!(Error::UnknownExpression(op.to_string()))
			}
		}
	}

	fn required(&mut self, op: &str, map: &Map<String, Json>, names: &[&str]) -> Result<Vec<Expression>> {
		let mut out = Vec::with_capacity(names.len());
		for name in names {
			match map.get(*name) {
				Some(v) => out.push(self.parse(v)?),
				None => bail!(parse_error(format!("Missing '{name}' parameter to {op}"))),
			}
		}
		Ok(out)
	}

	fn optional(&mut self, map: &Map<String, Json>, name: &str, out: &mut Vec<Expression>) -> Result<bool> {
		match map.get(name) {
			Some(v) => {
				out.push(self.parse(v)?);
				Ok(true)
			}
			None => Ok(false),
		}
	}

	fn parse_date_part(&mut self, op: &str, part: DatePart, args: &Json) -> Result<Expression> {
		let named = match args {
			Json::Object(map) if map.contains_key("date") => Some(map),
			_ => None,
		};
		let (children, has_timezone) = match named {
			Some(map) => {
				let map = named_args(op, &Json::Object(map.clone()), &["date", "timezone"])?;
				let mut children = self.required(op, &map, &["date"])?;
				let tz = self.optional(&map, "timezone", &mut children)?;
				(children, tz)
			}
			None => (self.exactly(op, args, 1)?, false),
		};
		Ok(Expression::new(
			ExprKind::DatePart {
				part,
				has_timezone,
			},
			children,
		))
	}

	fn parse_cond(&mut self, args: &Json) -> Result<Expression> {
		let children = match args {
			Json::Object(_) => {
				let map = named_args("$cond", args, &["if", "then", "else"])?;
				self.required("$cond", &map, &["if", "then", "else"])?
			}
			other => self.exactly("$cond", other, 3)?,
		};
		Ok(Expression::new(ExprKind::Cond, children))
	}

	fn parse_switch(&mut self, args: &Json) -> Result<Expression> {
		let map = named_args("$switch", args, &["branches", "default"])?;
		let Some(Json::Array(branches)) = map.get("branches") else {
			bail!(Error::fail(40061, "$switch expected an array for 'branches'"));
		};
		if branches.is_empty() {
			bail!(Error::fail(40068, "$switch requires at least one branch."));
		}
		let mut children = Vec::with_capacity(branches.len() * 2 + 1);
		for branch in branches {
			let branch = named_args("$switch", branch, &["case", "then"])?;
			let (Some(case), Some(then)) = (branch.get("case"), branch.get("then")) else {
				bail!(Error::fail(40064, "$switch requires each branch have a 'case' and a 'then' expression."));
			};
			children.push(self.parse(case)?);
			children.push(self.parse(then)?);
		}
		let has_default = self.optional(&map, "default", &mut children)?;
		Ok(Expression::new(
			ExprKind::Switch {
				has_default,
			},
			children,
		))
	}

	fn parse_let(&mut self, args: &Json) -> Result<Expression> {
		let map = named_args("$let", args, &["vars", "in"])?;
		let (Some(Json::Object(vars)), Some(body)) = (map.get("vars"), map.get("in")) else {
			bail!(parse_error("$let requires an object for 'vars' and an 'in' expression"));
		};
		// Initializers are evaluated outside the scope they introduce
		let mut children = Vec::with_capacity(vars.len() + 1);
		for init in vars.values() {
			children.push(self.parse(init)?);
		}
		let mut bound = Vec::with_capacity(vars.len());
		for name in vars.keys() {
			bound.push((self.define(name)?, name.clone()));
		}
		let body = self.parse(body);
		self.pop_scope(bound.len());
		children.push(body?);
		Ok(Expression::new(
			ExprKind::Let {
				vars: bound,
			},
			children,
		))
	}

	fn parse_filter(&mut self, args: &Json) -> Result<Expression> {
		let map = named_args("$filter", args, &["input", "as", "cond"])?;
		let input = match map.get("input") {
			Some(input) => self.parse(input)?,
			None => bail!(Error::fail(28648, "Missing 'input' parameter to $filter")),
		};
		let name = match map.get("as") {
			Some(Json::String(name)) => name.clone(),
			Some(_) => bail!(parse_error("'as' parameter to $filter must be a string")),
			None => "this".to_string(),
		};
		let Some(cond) = map.get("cond") else {
			bail!(Error::fail(28650, "Missing 'cond' parameter to $filter"));
		};
		let this = self.define(&name)?;
		let cond = self.parse(cond);
		self.pop_scope(1);
		Ok(Expression::new(
			ExprKind::Filter {
				this,
			},
			vec![input, cond?],
		))
	}
}

fn named_args(op: &str, args: &Json, allowed: &[&str]) -> Result<Map<String, Json>> {
	let Json::Object(map) = args else {
		bail!(parse_error(format!("{op} only supports an object as its argument")));
	};
	if let Some(unknown) = map.keys().find(|k| !allowed.contains(&k.as_str())) {
		bail!(parse_error(format!("Unrecognized parameter to {op}: {unknown}")));
	}
	Ok(map.clone())
}

fn trig_op(op: &str) -> Option<TrigOp> {
	Some(match op {
		"$sin" => TrigOp::Sin,
		"$cos" => TrigOp::Cos,
		"$tan" => TrigOp::Tan,
		"$acos" => TrigOp::Acos,
		"$asin" => TrigOp::Asin,
		"$atan" => TrigOp::Atan,
		"$acosh" => TrigOp::Acosh,
		"$asinh" => TrigOp::Asinh,
		"$atanh" => TrigOp::Atanh,
		"$cosh" => TrigOp::Cosh,
		"$sinh" => TrigOp::Sinh,
		"$tanh" => TrigOp::Tanh,
		"$degreesToRadians" => TrigOp::DegreesToRadians,
		"$radiansToDegrees" => TrigOp::RadiansToDegrees,
		_ => return None,
	})
}

/// An array literal made only of constants is itself a constant
fn fold_array_literal(children: Vec<Expression>) -> Expression {
	if children.iter().all(|c| c.as_constant().is_some()) {
		let values: Array = children
			.into_iter()
			.filter_map(|c| match c.kind {
				ExprKind::Constant(v) => Some(v),
				_ => None,
			})
			.collect();
		return Expression::constant(values);
	}
	Expression::new(ExprKind::ArrayLiteral, children)
}

#[cfg(test)]
mod tests {
	use rstest::rstest;
	use serde_json::json;

	use super::*;
	use crate::err::code_of;

	#[test]
	fn paths_and_constants() {
		let expr = parse_expression(&json!({"$add": ["$a.b", 1, "x"]})).unwrap();
		assert_eq!(expr.to_string(), "{$add: [\"$a.b\", {$const: 1}, {$const: \"x\"}]}");
		let root = parse_expression(&json!("$$ROOT")).unwrap();
		assert!(matches!(root.kind, ExprKind::FieldPath(FieldPath { root: PathRoot::Root, .. })));
	}

	#[test]
	fn let_scopes_are_static() {
		let expr = parse_expression(&json!({
			"$let": {
				"vars": {"x": 1},
				"in": {"$let": {"vars": {"x": "$$x"}, "in": "$$x"}}
			}
		}))
		.unwrap();
		let ExprKind::Let {
			vars: outer,
		} = &expr.kind
		else {
			panic!("expected $let");
		};
		let inner = &expr.children[1];
		let ExprKind::Let {
			vars: inner_vars,
		} = &inner.kind
		else {
			panic!("expected nested $let");
		};
		// The inner initializer sees the outer x, the inner body sees the inner x
		let id_of = |e: &Expression| match &e.kind {
			ExprKind::FieldPath(FieldPath {
				root: PathRoot::User {
					id,
					..
				},
				..
			}) => *id,
			_ => panic!("expected a variable"),
		};
		assert_eq!(id_of(&inner.children[0]), outer[0].0);
		assert_eq!(id_of(&inner.children[1]), inner_vars[0].0);
		assert_ne!(outer[0].0, inner_vars[0].0);
	}

	#[test]
	fn filter_binds_this_only_in_cond() {
		let expr = parse_expression(&json!({"$filter": {"input": "$arr", "cond": {"$gt": ["$$this", 2]}}})).unwrap();
		assert!(matches!(expr.kind, ExprKind::Filter { .. }));
		let err = parse_expression(&json!({"$filter": {"input": "$$this", "cond": true}})).unwrap_err();
		assert_eq!(code_of(&err), Some(17276));
	}

	#[test]
	fn constant_array_literals_fold() {
		let expr = parse_expression(&json!({"$setIntersection": [[1, 2, 3], [2, "$a"]]})).unwrap();
		assert!(expr.children[0].as_constant().is_some());
		assert!(matches!(expr.children[1].kind, ExprKind::ArrayLiteral));
	}

	#[rstest]
	#[case::arity(json!({"$divide": [1]}), 16020)]
	#[case::unknown(json!({"$frobnicate": 1}), 168)]
	#[case::two_operators(json!({"$add": [1], "$abs": 1}), 15983)]
	#[case::empty_field(json!("$a..b"), 15998)]
	#[case::switch_without_branches(json!({"$switch": {"branches": []}}), 40068)]
	fn rejects(#[case] json: Json, #[case] code: i32) {
		let err = parse_expression(&json).unwrap_err();
		assert_eq!(code_of(&err), Some(code));
	}

	#[test]
	fn unsupported_operators_still_parse() {
		let expr = parse_expression(&json!({"$toString": "$a"})).unwrap();
		assert!(matches!(expr.kind, ExprKind::Unsupported(ref name) if name == "$toString"));
	}

	#[test]
	fn extended_json_is_constant() {
		let expr = parse_expression(&json!({"$date": {"$numberLong": "86400000"}})).unwrap();
		assert_eq!(expr.as_constant().map(|v| v.to_string()), Some("86400000".to_string()));
	}
}
