//! The evaluator for [`EExpression`] trees.
//!
//! Evaluation is total over ordinary type mismatches: an operation applied to operands it does
//! not support produces `Nothing`. Errors are raised only by `fail` expressions, by
//! division-like operations with a zero divisor, and by broken internal invariants.

pub mod agg;
pub mod arith;
pub mod date;
pub mod regex;
pub mod set;
pub mod string;

use std::sync::Arc;

use anyhow::{Result, bail};

use super::ctx::ExecCtx;
use super::expr::{EExpression, EPrimBinaryOp, EPrimUnaryOp};
use crate::err::Error;
use crate::val::{Array, Collator, Object, TypeTags, Value, array_to_set, bson, three_way};

/// Evaluates an expression against the slots of `ctx`
pub fn eval(expr: &EExpression, ctx: &mut ExecCtx) -> Result<Value> {
	Ok(match expr {
		EExpression::Constant(v) => v.clone(),
		EExpression::Variable(slot) => ctx.get(*slot).clone(),
		EExpression::LocalVariable {
			frame,
			idx,
		} => match ctx.local(*frame, *idx) {
			Some(v) => v.clone(),
			None => fail!("unbound local variable l{frame}.{idx}"),
		},
		EExpression::LocalBind {
			frame,
			binds,
			body,
		} => {
			let mut values = Vec::with_capacity(binds.len());
			for bind in binds {
				values.push(eval(bind, ctx)?);
			}
			ctx.push_frame(*frame, values);
			let res = eval(body, ctx);
			ctx.pop_frame();
			res?
		}
		EExpression::PrimBinary {
			op,
			lhs,
			rhs,
			collator,
		} => binary(*op, lhs, rhs, collator.as_deref(), ctx)?,
		EExpression::PrimUnary {
			op,
			operand,
		} => {
			let v = eval(operand, ctx)?;
			match op {
				EPrimUnaryOp::LogicNot => arith::not(&v),
				EPrimUnaryOp::Negate => arith::negate(&v),
			}
		}
		EExpression::Function {
			name,
			args,
		} => call(name, args, ctx)?,
		EExpression::If {
			cond,
			then,
			otherwise,
		} => match eval(cond, ctx)? {
			Value::Boolean(true) => eval(then, ctx)?,
			_ => eval(otherwise, ctx)?,
		},
		EExpression::Fail {
			code,
			message,
		} => bail!(Error::fail(*code, message.clone())),
		EExpression::NumConvert {
			operand,
			target,
		} => eval(operand, ctx)?.numeric_convert(*target),
		EExpression::TypeMatch {
			operand,
			mask,
		} => {
			let v = eval(operand, ctx)?;
			if v.is_nothing() {
				Value::Nothing
			} else {
				Value::Boolean(v.tag().type_mask() & mask != 0)
			}
		}
	})
}

/// Evaluates a predicate, treating anything other than `true` as false
pub fn eval_predicate(expr: &EExpression, ctx: &mut ExecCtx) -> Result<bool> {
	Ok(matches!(eval(expr, ctx)?, Value::Boolean(true)))
}

fn binary(
	op: EPrimBinaryOp,
	lhs: &EExpression,
	rhs: &EExpression,
	collator: Option<&EExpression>,
	ctx: &mut ExecCtx,
) -> Result<Value> {
	match op {
		EPrimBinaryOp::LogicAnd => {
			return match eval(lhs, ctx)? {
				Value::Boolean(true) => eval(rhs, ctx),
				Value::Boolean(false) => Ok(Value::Boolean(false)),
				_ => Ok(Value::Nothing),
			};
		}
		EPrimBinaryOp::LogicOr => {
			return match eval(lhs, ctx)? {
				Value::Boolean(false) => eval(rhs, ctx),
				Value::Boolean(true) => Ok(Value::Boolean(true)),
				_ => Ok(Value::Nothing),
			};
		}
		_ => {}
	}
	let l = eval(lhs, ctx)?;
	let r = eval(rhs, ctx)?;
	let collator = match collator {
		Some(c) => collator_arg(&eval(c, ctx)?),
		None => None,
	};
	let collator = collator.as_deref();
	Ok(match op {
		EPrimBinaryOp::Add => arith::add(&l, &r)?,
		EPrimBinaryOp::Sub => arith::sub(&l, &r),
		EPrimBinaryOp::Mul => arith::mul(&l, &r),
		EPrimBinaryOp::Div => arith::div(&l, &r)?,
		EPrimBinaryOp::Cmp3w => arith::compare3way(&l, &r, collator),
		_ => generic_compare(op, &l, &r, collator),
	})
}

/// Applies a comparison operator to two values of the same canonical type
fn generic_compare(
	op: EPrimBinaryOp,
	lhs: &Value,
	rhs: &Value,
	collator: Option<&dyn Collator>,
) -> Value {
	let (Some(lt), Some(rt)) = (lhs.tag().to_type(), rhs.tag().to_type()) else {
		return Value::Nothing;
	};
	if lhs.is_nothing() || rhs.is_nothing() || lt.canonical_order() != rt.canonical_order() {
		return Value::Nothing;
	}
	let Some(ord) = three_way(lhs, rhs, collator) else {
		return Value::Nothing;
	};
	Value::Boolean(match op {
		EPrimBinaryOp::Less => ord.is_lt(),
		EPrimBinaryOp::LessEq => ord.is_le(),
		EPrimBinaryOp::Greater => ord.is_gt(),
		EPrimBinaryOp::GreaterEq => ord.is_ge(),
		EPrimBinaryOp::Eq => ord.is_eq(),
		EPrimBinaryOp::Neq => ord.is_ne(),
		_ => return Value::Nothing,
	})
}

pub(crate) fn collator_arg(value: &Value) -> Option<Arc<dyn Collator>> {
	match value {
		Value::Collator(c) => Some(c.clone()),
		_ => None,
	}
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<()> {
	tassert!(
		(min..=max).contains(&args.len()),
		5611501,
		"function '{name}' expects between {min} and {max} arguments, got {}",
		args.len()
	);
	Ok(())
}

fn predicate(value: &Value, f: impl Fn(&Value) -> bool) -> Value {
	if value.is_nothing() {
		Value::Nothing
	} else {
		Value::Boolean(f(value))
	}
}

fn call(name: &str, args: &[EExpression], ctx: &mut ExecCtx) -> Result<Value> {
	if name == "fillEmpty" {
		tassert!(args.len() == 2, 5611501, "function 'fillEmpty' expects 2 arguments");
		let first = eval(&args[0], ctx)?;
		return if first.is_nothing() {
			eval(&args[1], ctx)
		} else {
			Ok(first)
		};
	}
	let mut values = Vec::with_capacity(args.len());
	for arg in args {
		values.push(eval(arg, ctx)?);
	}
	builtin(name, values, ctx)
}

fn builtin(name: &str, args: Vec<Value>, ctx: &mut ExecCtx) -> Result<Value> {
	Ok(match name {
		// Type predicates
		"exists" => {
			arity(name, &args, 1, 1)?;
			Value::Boolean(!args[0].is_nothing())
		}
		"isNull" => {
			arity(name, &args, 1, 1)?;
			predicate(&args[0], Value::is_null)
		}
		"isObject" => {
			arity(name, &args, 1, 1)?;
			predicate(&args[0], |v| v.tag().is_object())
		}
		"isArray" => {
			arity(name, &args, 1, 1)?;
			predicate(&args[0], |v| v.tag().is_array())
		}
		"isString" => {
			arity(name, &args, 1, 1)?;
			predicate(&args[0], |v| v.tag().is_string())
		}
		"isNumber" => {
			arity(name, &args, 1, 1)?;
			predicate(&args[0], |v| v.tag().is_number())
		}
		"isBinData" => {
			arity(name, &args, 1, 1)?;
			predicate(&args[0], |v| v.tag().is_bin_data())
		}
		"isDate" => {
			arity(name, &args, 1, 1)?;
			predicate(&args[0], |v| v.tag() == TypeTags::Date)
		}
		"isTimestamp" => {
			arity(name, &args, 1, 1)?;
			predicate(&args[0], |v| v.tag() == TypeTags::Timestamp)
		}
		"isNaN" => {
			arity(name, &args, 1, 1)?;
			predicate(&args[0], |v| match v {
				Value::NumberDouble(d) => d.is_nan(),
				_ => false,
			})
		}
		"isMinKey" => {
			arity(name, &args, 1, 1)?;
			predicate(&args[0], |v| matches!(v, Value::MinKey))
		}
		"isMaxKey" => {
			arity(name, &args, 1, 1)?;
			predicate(&args[0], |v| matches!(v, Value::MaxKey))
		}
		// Containers
		"getField" => {
			arity(name, &args, 2, 2)?;
			match args[1].string_view() {
				Some(field) => args[0].get_field(field).into_owned(),
				None => Value::Nothing,
			}
		}
		"getElement" => {
			arity(name, &args, 2, 2)?;
			get_element(&args[0], &args[1])
		}
		"newArray" => Value::Array(Box::new(args.into_iter().collect::<Array>())),
		// Alternating field names and values
		"newObj" => {
			tassert!(args.len() % 2 == 0, 5611501, "function 'newObj' expects name and value pairs");
			let mut obj = Object::with_capacity(args.len() / 2);
			let mut it = args.into_iter();
			while let (Some(name), Some(value)) = (it.next(), it.next()) {
				if let Some(name) = name.string_view() {
					if !value.is_nothing() {
						obj.push(name, value);
					}
				}
			}
			obj.into()
		}
		"arrayToSet" => {
			arity(name, &args, 1, 1)?;
			array_to_set(&args[0], None)
		}
		"collArrayToSet" => {
			arity(name, &args, 2, 2)?;
			array_to_set(&args[1], collator_arg(&args[0]))
		}
		"reverseArray" => {
			arity(name, &args, 1, 1)?;
			reverse_array(&args[0])
		}
		"concatArrays" => concat_arrays(&args),
		"bsonSize" => {
			arity(name, &args, 1, 1)?;
			if args[0].tag().is_object() {
				Value::NumberInt32(bson::bson_size(&args[0])?)
			} else {
				Value::Nothing
			}
		}
		// Arithmetic
		"abs" => {
			arity(name, &args, 1, 1)?;
			arith::abs(&args[0])
		}
		"ceil" => {
			arity(name, &args, 1, 1)?;
			arith::ceil(&args[0])
		}
		"floor" => {
			arity(name, &args, 1, 1)?;
			arith::floor(&args[0])
		}
		"trunc" => {
			arity(name, &args, 1, 1)?;
			arith::trunc(&args[0])
		}
		"exp" => {
			arity(name, &args, 1, 1)?;
			arith::exp(&args[0])
		}
		"ln" => {
			arity(name, &args, 1, 1)?;
			arith::ln(&args[0])
		}
		"log10" => {
			arity(name, &args, 1, 1)?;
			arith::log10(&args[0])
		}
		"sqrt" => {
			arity(name, &args, 1, 1)?;
			arith::sqrt(&args[0])
		}
		"mod" => {
			arity(name, &args, 2, 2)?;
			arith::modulo(&args[0], &args[1])?
		}
		"doubleDoubleSum" => arith::double_double_sum(&args)?,
		"atan2" => {
			arity(name, &args, 2, 2)?;
			arith::atan2(&args[0], &args[1])
		}
		"acos" | "acosh" | "asin" | "asinh" | "atan" | "atanh" | "cos" | "cosh" | "sin" | "sinh"
		| "tan" | "tanh" | "degreesToRadians" | "radiansToDegrees" => {
			arity(name, &args, 1, 1)?;
			arith::trig(name, &args[0])
		}
		// Strings
		"concat" => string::concat(&args),
		"replaceOne" => {
			arity(name, &args, 3, 3)?;
			string::replace_one(&args[0], &args[1], &args[2])
		}
		"split" => {
			arity(name, &args, 2, 2)?;
			string::split(&args[0], &args[1])
		}
		"indexOfBytes" => {
			arity(name, &args, 3, 4)?;
			string::index_of(&args[0], &args[1], &args[2], args.get(3), string::Unit::Bytes)
		}
		"indexOfCP" => {
			arity(name, &args, 3, 4)?;
			string::index_of(&args[0], &args[1], &args[2], args.get(3), string::Unit::CodePoints)
		}
		"toUpper" => {
			arity(name, &args, 1, 1)?;
			string::to_upper(&args[0])
		}
		"toLower" => {
			arity(name, &args, 1, 1)?;
			string::to_lower(&args[0])
		}
		"coerceToString" => {
			arity(name, &args, 1, 1)?;
			string::coerce_to_string(&args[0])
		}
		"hasNullBytes" => {
			arity(name, &args, 1, 1)?;
			match args[0].string_view() {
				Some(s) => Value::Boolean(s.contains('\0')),
				None => Value::Nothing,
			}
		}
		// Sets
		"setUnion" => set::union(&args, None),
		"setIntersection" => set::intersection(&args, None),
		"setDifference" => {
			arity(name, &args, 2, 2)?;
			set::difference(&args[0], &args[1], None)
		}
		"collSetUnion" => {
			arity(name, &args, 1, usize::MAX)?;
			set::union(&args[1..], collator_arg(&args[0]))
		}
		"collSetIntersection" => {
			arity(name, &args, 1, usize::MAX)?;
			set::intersection(&args[1..], collator_arg(&args[0]))
		}
		"collSetDifference" => {
			arity(name, &args, 3, 3)?;
			set::difference(&args[1], &args[2], collator_arg(&args[0]))
		}
		// Regular expressions
		"regexCompile" => {
			arity(name, &args, 2, 2)?;
			regex::compile(&args[0], &args[1])?
		}
		"regexMatch" => {
			arity(name, &args, 2, 2)?;
			regex::is_match(&args[0], &args[1])
		}
		"regexFind" => {
			arity(name, &args, 2, 2)?;
			regex::find(&args[0], &args[1])
		}
		"regexFindAll" => {
			arity(name, &args, 2, 2)?;
			regex::find_all(&args[0], &args[1])
		}
		"getRegexPattern" => {
			arity(name, &args, 1, 1)?;
			match args[0].bson_regex_view() {
				Some(re) => Value::new_string(re.pattern),
				None => Value::Nothing,
			}
		}
		"getRegexFlags" => {
			arity(name, &args, 1, 1)?;
			match args[0].bson_regex_view() {
				Some(re) => Value::new_string(re.flags),
				None => Value::Nothing,
			}
		}
		// Dates
		"isTimezone" => {
			arity(name, &args, 2, 2)?;
			date::is_timezone(&args[0], &args[1])
		}
		"isTimeUnit" => {
			arity(name, &args, 1, 1)?;
			Value::Boolean(args[0].string_view().and_then(date::TimeUnit::parse).is_some())
		}
		"isDayOfWeek" => {
			arity(name, &args, 1, 1)?;
			Value::Boolean(args[0].string_view().and_then(date::parse_day_of_week).is_some())
		}
		"dayOfMonth" | "dayOfWeek" | "dayOfYear" => {
			arity(name, &args, 3, 3)?;
			date::date_part(name, &args[0], &args[1], &args[2])
		}
		"dateDiff" => {
			arity(name, &args, 5, 6)?;
			date::date_diff(&args[0], &args[1], &args[2], &args[3], &args[4], args.get(5))
		}
		"dateAdd" => {
			arity(name, &args, 5, 5)?;
			date::date_add(&args[0], &args[1], &args[2], &args[3], &args[4])?
		}
		// Aggregates fold their input into the running accumulator
		"addToArray" => {
			arity(name, &args, 1, 1)?;
			agg::add_to_array(ctx.take_accumulator(), one(args))
		}
		"addToSet" => {
			arity(name, &args, 1, 1)?;
			agg::add_to_set(ctx.take_accumulator(), one(args), None)
		}
		"collAddToSet" => {
			arity(name, &args, 2, 2)?;
			let collator = collator_arg(&args[0]);
			agg::add_to_set(ctx.take_accumulator(), last(args), collator)
		}
		"sum" => {
			arity(name, &args, 1, 1)?;
			agg::sum(ctx.take_accumulator(), &args[0])?
		}
		"min" => {
			arity(name, &args, 1, 1)?;
			agg::min(ctx.take_accumulator(), one(args), None)
		}
		"max" => {
			arity(name, &args, 1, 1)?;
			agg::max(ctx.take_accumulator(), one(args), None)
		}
		"collMin" => {
			arity(name, &args, 2, 2)?;
			let collator = collator_arg(&args[0]);
			agg::min(ctx.take_accumulator(), last(args), collator.as_deref())
		}
		"collMax" => {
			arity(name, &args, 2, 2)?;
			let collator = collator_arg(&args[0]);
			agg::max(ctx.take_accumulator(), last(args), collator.as_deref())
		}
		"first" => {
			arity(name, &args, 1, 1)?;
			agg::first(ctx.take_accumulator(), one(args))
		}
		"last" => {
			arity(name, &args, 1, 1)?;
			agg::last(ctx.take_accumulator(), one(args))
		}
		_ => bail!(Error::assertion(5611502, format!("unknown function '{name}'"))),
	})
}

fn one(args: Vec<Value>) -> Value {
	args.into_iter().next().unwrap_or_default()
}

fn last(args: Vec<Value>) -> Value {
	args.into_iter().next_back().unwrap_or_default()
}

fn get_element(array: &Value, idx: &Value) -> Value {
	let Value::NumberInt32(idx) = idx else {
		return Value::Nothing;
	};
	if !array.tag().is_array() {
		return Value::Nothing;
	}
	let mut values = Vec::new();
	let mut it = crate::val::ArrayEnumerator::new(array);
	while !it.at_end() {
		values.push(it.view().clone());
		it.advance();
	}
	let pos = if *idx < 0 {
		values.len().checked_sub(idx.unsigned_abs() as usize)
	} else {
		Some(*idx as usize)
	};
	pos.and_then(|p| values.get(p)).cloned().unwrap_or_default()
}

fn reverse_array(array: &Value) -> Value {
	if !array.tag().is_array() {
		return Value::Nothing;
	}
	let mut out = collect_array(array);
	out.reverse();
	Value::Array(Box::new(out))
}

fn concat_arrays(args: &[Value]) -> Value {
	let mut out = Array::new();
	for arg in args {
		if !arg.tag().is_array() {
			return Value::Nothing;
		}
		for v in collect_array(arg).into_values() {
			out.push(v);
		}
	}
	Value::Array(Box::new(out))
}

pub(crate) fn collect_array(array: &Value) -> Array {
	let mut out = Array::new();
	let mut it = crate::val::ArrayEnumerator::new(array);
	while !it.at_end() {
		out.push(it.view().clone());
		it.advance();
	}
	out
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;
	use crate::err::code_of;
	use crate::val::json::from_json;

	fn run(expr: &EExpression) -> Value {
		eval(expr, &mut ExecCtx::new()).unwrap()
	}

	fn c(v: impl Into<Value>) -> EExpression {
		EExpression::constant(v)
	}

	#[rstest]
	#[case::and_short_circuits(
		EExpression::and(c(false), EExpression::fail(1, "unreachable")),
		"false"
	)]
	#[case::or_short_circuits(EExpression::or(c(true), EExpression::fail(1, "unreachable")), "true")]
	#[case::and_of_nothing(EExpression::and(EExpression::nothing(), c(true)), "Nothing")]
	#[case::cross_type_equality(
		EExpression::binary(EPrimBinaryOp::Eq, c(1), EExpression::string("1")),
		"Nothing"
	)]
	#[case::numeric_equality(
		EExpression::binary(EPrimBinaryOp::Eq, c(1), c(1.0)),
		"true"
	)]
	#[case::cmp3w_cross_type(
		EExpression::binary(EPrimBinaryOp::Cmp3w, c(1), EExpression::string("1")),
		"-1"
	)]
	#[case::fill_empty(EExpression::fill_empty(EExpression::nothing(), c(3)), "3")]
	#[case::fill_empty_is_lazy(
		EExpression::fill_empty(c(2), EExpression::fail(1, "unreachable")),
		"2"
	)]
	#[case::type_match(EExpression::type_match(c(2.5), crate::val::tags::mask::NUMBER), "true")]
	#[case::type_match_nothing(
		EExpression::type_match(EExpression::nothing(), crate::val::tags::mask::NUMBER),
		"Nothing"
	)]
	#[case::if_non_boolean(
		EExpression::if_then_else(EExpression::nothing(), c(1), c(2)),
		"2"
	)]
	#[case::convert(EExpression::num_convert(c(3.0), TypeTags::NumberInt32), "3")]
	#[case::convert_lossy(EExpression::num_convert(c(3.5), TypeTags::NumberInt32), "Nothing")]
	fn evaluates(#[case] expr: EExpression, #[case] expected: &str) {
		assert_eq!(run(&expr).to_string(), expected);
	}

	#[test]
	fn local_binds_are_scoped() {
		let expr = EExpression::local_bind(
			1,
			vec![c(10)],
			EExpression::binary(EPrimBinaryOp::Add, EExpression::local(1, 0), c(1)),
		);
		let mut ctx = ExecCtx::new();
		assert_eq!(eval(&expr, &mut ctx).unwrap().to_string(), "11");
		assert!(eval(&EExpression::local(1, 0), &mut ctx).is_err());
	}

	#[test]
	fn fail_carries_its_code() {
		let err = eval(&EExpression::fail(5073201, "input to $filter must be an array"), &mut ExecCtx::new())
			.unwrap_err();
		assert_eq!(code_of(&err), Some(5073201));
	}

	#[test]
	fn slots_and_fields() {
		let mut ctx = ExecCtx::new();
		ctx.set(1, from_json(&serde_json::json!({"a": [10, 20, 30]})).unwrap());
		let field = EExpression::func("getField", vec![EExpression::var(1), EExpression::string("a")]);
		let last = EExpression::func("getElement", vec![field.clone(), c(-1)]);
		assert_eq!(eval(&last, &mut ctx).unwrap().to_string(), "30");
		let gone = EExpression::func("getElement", vec![field, c(3)]);
		assert!(eval(&gone, &mut ctx).unwrap().is_nothing());
	}

	#[test]
	fn elements_of_wire_arrays() {
		let native = from_json(&serde_json::json!({"a": ["x", "a string long enough to matter", 3]})).unwrap();
		let raw = bson::decode_document(bson::encode_document(&native).unwrap().into()).unwrap();
		let mut ctx = ExecCtx::new();
		ctx.set(1, raw);
		let field = EExpression::func("getField", vec![EExpression::var(1), EExpression::string("a")]);
		let second = EExpression::func("getElement", vec![field.clone(), c(1)]);
		let second = eval(&second, &mut ctx).unwrap();
		assert_eq!(second.tag(), TypeTags::BsonString);
		assert_eq!(second.string_view(), Some("a string long enough to matter"));
		let first = EExpression::func("getElement", vec![field, c(-3)]);
		assert_eq!(eval(&first, &mut ctx).unwrap().string_view(), Some("x"));
	}

	#[test]
	fn unknown_functions_are_internal_errors() {
		let err = eval(&EExpression::func("noSuchFunction", vec![]), &mut ExecCtx::new()).unwrap_err();
		assert_eq!(code_of(&err), Some(5611502));
	}
}
