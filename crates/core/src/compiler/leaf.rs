//! Lowering of operators whose operands are all evaluated eagerly.
//!
//! Every builder here follows the same shape: bind the operands in a local frame, yield null when
//! an operand is null or missing, fail with a stable code when an operand has the wrong type,
//! and otherwise call the runtime builtin.

use anyhow::{Result, bail};

use super::context::ExpressionVisitorContext;
use super::helpers::{
	CaseValuePair, all_of, any_of, is_date_like, local_bind, multi_branch, negative, non_array, non_numeric,
	non_object, non_string, not_representable_as_i32, null, null_or_missing, string_eq, type_is,
};
use crate::err::Error;
use crate::expr::{Bound, CmpOp, DatePart, ExprKind, Expression, IndexUnit, RegexOp, SetOp, TrigOp};
use crate::sbe::vm;
use crate::sbe::{EExpression, EPrimBinaryOp};
use crate::val::tags::mask;
use crate::val::{BsonType, TypeTags, Value};

pub(super) fn build(ctx: &mut ExpressionVisitorContext<'_>, expr: &Expression) -> Result<()> {
	let args = ctx.pop_exprs(expr.children.len())?;
	let compiled = match &expr.kind {
		ExprKind::ArrayLiteral => {
			// Missing elements of an array literal are null
			let elements = args.into_iter().map(|a| EExpression::fill_empty(a, null())).collect();
			EExpression::func("newArray", elements)
		}
		ExprKind::ObjectLiteral(names) => {
			let mut fields = Vec::with_capacity(names.len() * 2);
			for (name, value) in names.iter().zip(args) {
				fields.push(EExpression::string(name));
				fields.push(value);
			}
			EExpression::func("newObj", fields)
		}
		ExprKind::Abs => abs(ctx, args),
		ExprKind::Add => add(ctx, args),
		ExprKind::Ceil => numeric_unary(ctx, args, "ceil", 4903702, "$ceil only supports numeric types"),
		ExprKind::Floor => numeric_unary(ctx, args, "floor", 4903704, "$floor only supports numeric types"),
		ExprKind::Exp => numeric_unary(ctx, args, "exp", 4903703, "$exp only supports numeric types"),
		ExprKind::Ln => logarithm(ctx, args, "ln", (4903705, "$ln only supports numeric types"), (4903706, "$ln's argument must be a positive number")),
		ExprKind::Log10 => logarithm(
			ctx,
			args,
			"log10",
			(4903707, "$log10 only supports numeric types"),
			(4903708, "$log10's argument must be a positive number"),
		),
		ExprKind::Sqrt => sqrt(ctx, args),
		ExprKind::Divide => divide(ctx, args),
		ExprKind::Mod => modulo(ctx, args),
		ExprKind::Multiply => multiply(ctx, args),
		ExprKind::ArrayElemAt => array_elem_at(ctx, args),
		ExprKind::First => element_at(ctx, args, "$first", 0),
		ExprKind::Last => element_at(ctx, args, "$last", -1),
		ExprKind::ConcatArrays => concat_arrays(ctx, args),
		ExprKind::IsArray => EExpression::fill_empty(EExpression::func("isArray", args), EExpression::constant(false)),
		ExprKind::ReverseArray => checked_unary(ctx, args, non_array, "reverseArray", 5154901, "$reverseArray argument must be an array"),
		ExprKind::BsonSize => checked_unary(ctx, args, non_object, "bsonSize", 5043001, "$bsonSize requires a document input"),
		ExprKind::Not => {
			let operand = one(args)?;
			EExpression::not(super::helpers::coerce_to_bool(ctx.frame_ids(), operand))
		}
		ExprKind::Compare(op) => compare(ctx, args, *op),
		ExprKind::Concat => concat(ctx, args),
		ExprKind::IndexOf {
			unit,
			has_start,
			has_end,
		} => index_of(ctx, args, *unit, *has_start, *has_end),
		ExprKind::ReplaceOne => replace_one(ctx, args),
		ExprKind::Split => split(ctx, args),
		ExprKind::ToLower => case_conversion(ctx, args, "toLower"),
		ExprKind::ToUpper => case_conversion(ctx, args, "toUpper"),
		ExprKind::IsNumber => EExpression::fill_empty(EExpression::func("isNumber", args), EExpression::constant(false)),
		ExprKind::DatePart {
			part,
			has_timezone,
		} => date_part(ctx, args, *part, *has_timezone)?,
		ExprKind::DateDiff {
			has_timezone,
			has_start_of_week,
		} => date_diff(ctx, args, *has_timezone, *has_start_of_week)?,
		ExprKind::DateAdd {
			subtract,
			has_timezone,
		} => date_add(ctx, args, *subtract, *has_timezone)?,
		ExprKind::Regex {
			op,
			has_options,
		} => regex(ctx, args, *op, *has_options)?,
		ExprKind::SetOp(op) => set_op(ctx, args, *op),
		ExprKind::Trig(op) => trig(ctx, args, *op),
		ExprKind::Atan2 => atan2(ctx, args),
		kind => bail!(Error::assertion(5182300, format!("Unsupported expression in SBE stage builder: {}", kind.name()))),
	};
	trace!(target: "sbe::compiler", op = expr.kind.name(), expr = %compiled, "compiled expression");
	ctx.push_expr(compiled)
}

fn one(mut args: Vec<EExpression>) -> Result<EExpression> {
	tassert!(args.len() == 1, 5611709, "expected one operand, found {}", args.len());
	match args.pop() {
		Some(arg) => Ok(arg),
		None => bail!(Error::assertion(5611709, "expected one operand")),
	}
}

fn fail(code: i32, message: impl Into<String>) -> EExpression {
	EExpression::fail(code, message)
}

fn call(name: &str, args: &[EExpression]) -> EExpression {
	EExpression::func(name, args.to_vec())
}

fn any_null(refs: &[EExpression]) -> EExpression {
	any_of(refs.iter().map(null_or_missing).collect())
}

fn checked_unary(
	ctx: &mut ExpressionVisitorContext<'_>,
	args: Vec<EExpression>,
	wrong_type: fn(&EExpression) -> EExpression,
	builtin: &str,
	code: i32,
	message: &str,
) -> EExpression {
	local_bind(ctx.frame_ids(), args, |r| {
		multi_branch(
			vec![(null_or_missing(&r[0]), null()), (wrong_type(&r[0]), fail(code, message))],
			call(builtin, r),
		)
	})
}

fn numeric_unary(ctx: &mut ExpressionVisitorContext<'_>, args: Vec<EExpression>, builtin: &str, code: i32, message: &str) -> EExpression {
	checked_unary(ctx, args, non_numeric, builtin, code, message)
}

fn abs(ctx: &mut ExpressionVisitorContext<'_>, args: Vec<EExpression>) -> EExpression {
	local_bind(ctx.frame_ids(), args, |r| {
		let long_min = all_of(vec![
			type_is(&r[0], TypeTags::NumberInt64),
			EExpression::binary(EPrimBinaryOp::Eq, r[0].clone(), EExpression::constant(i64::MIN)),
		]);
		multi_branch(
			vec![
				(null_or_missing(&r[0]), null()),
				(non_numeric(&r[0]), fail(4903700, "$abs only supports numeric types")),
				(long_min, fail(4903701, "can't take $abs of long long min")),
			],
			call("abs", r),
		)
	})
}

fn not_number_or_date(e: &EExpression) -> EExpression {
	EExpression::and(non_numeric(e), EExpression::not(EExpression::func("isDate", vec![e.clone()])))
}

fn add(ctx: &mut ExpressionVisitorContext<'_>, args: Vec<EExpression>) -> EExpression {
	if args.is_empty() {
		return EExpression::constant(0);
	}
	if args.len() == 2 {
		return local_bind(ctx.frame_ids(), args, |r| {
			let is_date = |e: &EExpression| EExpression::func("isDate", vec![e.clone()]);
			multi_branch(
				vec![
					(any_null(r), null()),
					(
						EExpression::or(not_number_or_date(&r[0]), not_number_or_date(&r[1])),
						fail(4974201, "only numbers and dates are allowed in an $add expression"),
					),
					(
						EExpression::and(is_date(&r[0]), is_date(&r[1])),
						fail(4974202, "only one date allowed in an $add expression"),
					),
					(EExpression::or(is_date(&r[0]), is_date(&r[1])), call("doubleDoubleSum", r)),
				],
				EExpression::binary(EPrimBinaryOp::Add, r[0].clone(), r[1].clone()),
			)
		});
	}
	local_bind(ctx.frame_ids(), args, |r| {
		multi_branch(
			vec![
				(any_null(r), null()),
				(
					any_of(r.iter().map(not_number_or_date).collect()),
					fail(4974203, "only numbers and dates are allowed in an $add expression"),
				),
			],
			call("doubleDoubleSum", r),
		)
	})
}

fn logarithm(
	ctx: &mut ExpressionVisitorContext<'_>,
	args: Vec<EExpression>,
	builtin: &str,
	type_error: (i32, &str),
	domain_error: (i32, &str),
) -> EExpression {
	local_bind(ctx.frame_ids(), args, |r| {
		let non_positive = EExpression::fill_empty(
			EExpression::binary(EPrimBinaryOp::LessEq, r[0].clone(), EExpression::constant(0i64)),
			EExpression::constant(false),
		);
		multi_branch(
			vec![
				(null_or_missing(&r[0]), null()),
				(non_numeric(&r[0]), fail(type_error.0, type_error.1)),
				(EExpression::func("isNaN", vec![r[0].clone()]), r[0].clone()),
				(non_positive, fail(domain_error.0, domain_error.1)),
			],
			call(builtin, r),
		)
	})
}

fn sqrt(ctx: &mut ExpressionVisitorContext<'_>, args: Vec<EExpression>) -> EExpression {
	local_bind(ctx.frame_ids(), args, |r| {
		multi_branch(
			vec![
				(null_or_missing(&r[0]), null()),
				(non_numeric(&r[0]), fail(4903709, "$sqrt only supports numeric types")),
				(EExpression::func("isNaN", vec![r[0].clone()]), r[0].clone()),
				(negative(&r[0]), fail(4903710, "$sqrt's argument must be greater than or equal to 0")),
			],
			call("sqrt", r),
		)
	})
}

fn divide(ctx: &mut ExpressionVisitorContext<'_>, args: Vec<EExpression>) -> EExpression {
	local_bind(ctx.frame_ids(), args, |r| {
		multi_branch(
			vec![
				(any_null(r), null()),
				(
					EExpression::or(non_numeric(&r[0]), non_numeric(&r[1])),
					fail(5073101, "$divide only supports numeric types"),
				),
			],
			EExpression::binary(EPrimBinaryOp::Div, r[0].clone(), r[1].clone()),
		)
	})
}

fn modulo(ctx: &mut ExpressionVisitorContext<'_>, args: Vec<EExpression>) -> EExpression {
	local_bind(ctx.frame_ids(), args, |r| {
		let (lhs, rhs) = (&r[0], &r[1]);
		// An integral double divisor behaves as an integer unless the dividend is a double too
		let rhs_expr = multi_branch(
			vec![(
				EExpression::and(type_is(rhs, TypeTags::NumberDouble), EExpression::not(type_is(lhs, TypeTags::NumberDouble))),
				EExpression::fill_empty(EExpression::num_convert(rhs.clone(), TypeTags::NumberInt32), rhs.clone()),
			)],
			rhs.clone(),
		);
		multi_branch(
			vec![
				(any_null(r), null()),
				(EExpression::or(non_numeric(lhs), non_numeric(rhs)), fail(5154000, "$mod only supports numeric types")),
			],
			EExpression::func("mod", vec![lhs.clone(), rhs_expr]),
		)
	})
}

fn multiply(ctx: &mut ExpressionVisitorContext<'_>, args: Vec<EExpression>) -> EExpression {
	if args.is_empty() {
		return EExpression::constant(1);
	}
	local_bind(ctx.frame_ids(), args, |r| {
		let product = r[1..]
			.iter()
			.fold(r[0].clone(), |acc, next| EExpression::binary(EPrimBinaryOp::Mul, acc, next.clone()));
		multi_branch(
			vec![
				(any_null(r), null()),
				(
					any_of(r.iter().map(non_numeric).collect()),
					fail(5073102, "only numbers are allowed in an $multiply expression"),
				),
			],
			product,
		)
	})
}

fn array_elem_at(ctx: &mut ExpressionVisitorContext<'_>, args: Vec<EExpression>) -> EExpression {
	let frames = ctx.frame_ids();
	let inner_frame = frames.generate();
	local_bind(frames, args, |r| {
		let (array, index) = (&r[0], &r[1]);
		let converted = EExpression::local(inner_frame, 0);
		let index32 = EExpression::local_bind(
			inner_frame,
			vec![EExpression::num_convert(index.clone(), TypeTags::NumberInt32)],
			EExpression::if_then_else(
				EExpression::func("exists", vec![converted.clone()]),
				converted,
				fail(5126703, "$arrayElemAt second argument cannot be represented as a 32-bit integer"),
			),
		);
		multi_branch(
			vec![
				(EExpression::or(null_or_missing(array), null_or_missing(index)), null()),
				(non_array(array), fail(5126701, "$arrayElemAt first argument must be an array")),
				(non_numeric(index), fail(5126702, "$arrayElemAt second argument must be a number")),
			],
			EExpression::func("getElement", vec![array.clone(), index32]),
		)
	})
}

fn element_at(ctx: &mut ExpressionVisitorContext<'_>, args: Vec<EExpression>, name: &str, index: i32) -> EExpression {
	local_bind(ctx.frame_ids(), args, |r| {
		multi_branch(
			vec![
				(null_or_missing(&r[0]), null()),
				(non_array(&r[0]), fail(5126704, format!("{name} argument must be an array"))),
			],
			EExpression::func("getElement", vec![r[0].clone(), EExpression::constant(index)]),
		)
	})
}

fn concat_arrays(ctx: &mut ExpressionVisitorContext<'_>, args: Vec<EExpression>) -> EExpression {
	if args.is_empty() {
		return EExpression::func("newArray", vec![]);
	}
	local_bind(ctx.frame_ids(), args, |r| {
		let mut cases = Vec::with_capacity(r.len() * 2);
		for arg in r {
			cases.push((null_or_missing(arg), null()));
			cases.push((non_array(arg), fail(5153400, "$concatArrays only supports arrays")));
		}
		multi_branch(cases, call("concatArrays", r))
	})
}

fn exists_not_undefined(e: &EExpression) -> EExpression {
	EExpression::and(
		EExpression::func("exists", vec![e.clone()]),
		EExpression::not(EExpression::type_match(e.clone(), mask::UNDEFINED)),
	)
}

fn compare(ctx: &mut ExpressionVisitorContext<'_>, args: Vec<EExpression>, op: CmpOp) -> EExpression {
	let collator = ctx.collator_slot();
	local_bind(ctx.frame_ids(), args, |r| {
		let (lhs, rhs) = (&r[0], &r[1]);
		let ordered = EExpression::collated(EPrimBinaryOp::Cmp3w, lhs.clone(), rhs.clone(), collator);
		let absent = EExpression::binary(EPrimBinaryOp::Cmp3w, exists_not_undefined(lhs), exists_not_undefined(rhs));
		let binop = match op {
			CmpOp::Eq => EPrimBinaryOp::Eq,
			CmpOp::Ne => EPrimBinaryOp::Neq,
			CmpOp::Gt => EPrimBinaryOp::Greater,
			CmpOp::Gte => EPrimBinaryOp::GreaterEq,
			CmpOp::Lt => EPrimBinaryOp::Less,
			CmpOp::Lte => EPrimBinaryOp::LessEq,
			CmpOp::Cmp => return EExpression::fill_empty(ordered, absent),
		};
		let zero = || EExpression::constant(0i64);
		EExpression::fill_empty(
			EExpression::binary(binop, ordered, zero()),
			EExpression::binary(binop, absent, zero()),
		)
	})
}

fn concat(ctx: &mut ExpressionVisitorContext<'_>, args: Vec<EExpression>) -> EExpression {
	if args.is_empty() {
		return EExpression::string("");
	}
	local_bind(ctx.frame_ids(), args, |r| {
		multi_branch(
			vec![
				(any_null(r), null()),
				(any_of(r.iter().map(non_string).collect()), fail(5073001, "$concat supports only strings")),
			],
			call("concat", r),
		)
	})
}

fn index_bound(index: &EExpression, name: &str, which: &str, codes: (i32, i32)) -> EExpression {
	let invalid = any_of(vec![null_or_missing(index), non_numeric(index), not_representable_as_i32(index)]);
	multi_branch(
		vec![
			(invalid, fail(codes.0, format!("${name} {which} index must resolve to a number"))),
			(negative(index), fail(codes.1, format!("${name} {which} index must be positive"))),
		],
		EExpression::num_convert(index.clone(), TypeTags::NumberInt64),
	)
}

fn index_of(
	ctx: &mut ExpressionVisitorContext<'_>,
	args: Vec<EExpression>,
	unit: IndexUnit,
	has_start: bool,
	has_end: bool,
) -> EExpression {
	let name = match unit {
		IndexUnit::Bytes => "indexOfBytes",
		IndexUnit::CodePoints => "indexOfCP",
	};
	local_bind(ctx.frame_ids(), args, |r| {
		let (string, sub) = (&r[0], &r[1]);
		let mut call_args = vec![string.clone(), sub.clone()];
		if has_start {
			call_args.push(index_bound(&r[2], name, "start", (5075303, 5075304)));
		} else {
			call_args.push(EExpression::constant(0i64));
		}
		if has_end {
			call_args.push(index_bound(&r[3], name, "end", (5075305, 5075306)));
		}
		multi_branch(
			vec![
				(null_or_missing(string), null()),
				(non_string(string), fail(5075300, format!("${name} string must resolve to a string or null"))),
				(null_or_missing(sub), fail(5075301, format!("${name} substring must resolve to a string"))),
				(non_string(sub), fail(5075302, format!("${name} substring must resolve to a string"))),
			],
			EExpression::func(name, call_args),
		)
	})
}

fn replace_one(ctx: &mut ExpressionVisitorContext<'_>, args: Vec<EExpression>) -> EExpression {
	local_bind(ctx.frame_ids(), args, |r| {
		let mut cases: Vec<CaseValuePair> = ["input", "find", "replacement"]
			.iter()
			.zip(r)
			.map(|(param, v)| {
				let valid = EExpression::or(null_or_missing(v), EExpression::func("isString", vec![v.clone()]));
				(EExpression::not(valid), fail(5154400, format!("$replaceOne requires that '{param}' be a string")))
			})
			.collect();
		cases.push((any_null(r), null()));
		multi_branch(cases, call("replaceOne", r))
	})
}

fn split(ctx: &mut ExpressionVisitorContext<'_>, args: Vec<EExpression>) -> EExpression {
	local_bind(ctx.frame_ids(), args, |r| {
		let (input, delimiter) = (&r[0], &r[1]);
		multi_branch(
			vec![
				(any_null(r), null()),
				(non_string(input), fail(5155402, "$split string expression must be a string")),
				(non_string(delimiter), fail(5155400, "$split delimiter must be a string")),
				(string_eq(delimiter, ""), fail(5155401, "$split delimiter must not be an empty string")),
			],
			call("split", r),
		)
	})
}

fn case_conversion(ctx: &mut ExpressionVisitorContext<'_>, args: Vec<EExpression>, builtin: &str) -> EExpression {
	local_bind(ctx.frame_ids(), args, |r| {
		let coerced = EExpression::func("coerceToString", vec![r[0].clone()]);
		multi_branch(
			vec![
				(null_or_missing(&r[0]), EExpression::string("")),
				(EExpression::type_match(r[0].clone(), mask::STRING_COERCIBLE), EExpression::func(builtin, vec![coerced])),
			],
			fail(5066300, format!("${builtin} input type is not supported")),
		)
	})
}

fn timezone_or_utc(args: &mut Vec<EExpression>, has_timezone: bool) {
	if !has_timezone {
		args.push(EExpression::string("UTC"));
	}
}

fn is_timezone(tzdb: &EExpression, tz: &EExpression) -> EExpression {
	EExpression::func("isTimezone", vec![tzdb.clone(), tz.clone()])
}

fn date_part(ctx: &mut ExpressionVisitorContext<'_>, mut args: Vec<EExpression>, part: DatePart, has_timezone: bool) -> Result<EExpression> {
	let tzdb = ctx.time_zone_db_var()?;
	timezone_or_utc(&mut args, has_timezone);
	let name = part.name();
	Ok(local_bind(ctx.frame_ids(), args, |r| {
		let (date, tz) = (&r[0], &r[1]);
		multi_branch(
			vec![
				(null_or_missing(tz), null()),
				(non_string(tz), fail(4998200, format!("{name} timezone must be a string"))),
				(EExpression::not(is_timezone(&tzdb, tz)), fail(4998201, format!("{name} timezone must be a valid timezone"))),
				(null_or_missing(date), null()),
				(EExpression::not(is_date_like(date)), fail(4998202, format!("{name} date must have a format of a date"))),
			],
			EExpression::func(part.builtin(), vec![tzdb.clone(), date.clone(), tz.clone()]),
		)
	}))
}

fn date_diff(
	ctx: &mut ExpressionVisitorContext<'_>,
	mut args: Vec<EExpression>,
	has_timezone: bool,
	has_start_of_week: bool,
) -> Result<EExpression> {
	let tzdb = ctx.time_zone_db_var()?;
	// Children: startDate, endDate, unit, then timezone and startOfWeek when present
	let start_of_week = if has_start_of_week { args.pop() } else { None };
	timezone_or_utc(&mut args, has_timezone);
	if let Some(sow) = start_of_week {
		args.push(sow);
	}
	let frames = ctx.frame_ids();
	let week_frame = frames.generate();
	Ok(local_bind(frames, args, |r| {
		let (start, end, unit, tz) = (&r[0], &r[1], &r[2], &r[3]);
		let unit_is_week = EExpression::local(week_frame, 0);
		let mut cases = vec![
			(null_or_missing(start), null()),
			(null_or_missing(end), null()),
			(null_or_missing(unit), null()),
			(null_or_missing(tz), null()),
		];
		if has_start_of_week {
			cases.push((EExpression::and(unit_is_week.clone(), null_or_missing(&r[4])), null()));
		}
		cases.extend([
			(non_string(tz), fail(5166504, "$dateDiff parameter 'timezone' must be a string")),
			(EExpression::not(is_timezone(&tzdb, tz)), fail(5166505, "$dateDiff parameter 'timezone' must be a valid timezone")),
			(EExpression::not(is_date_like(start)), fail(5166500, "$dateDiff parameter 'startDate' must be coercible to date")),
			(EExpression::not(is_date_like(end)), fail(5166501, "$dateDiff parameter 'endDate' must be coercible to date")),
			(non_string(unit), fail(5166502, "$dateDiff parameter 'unit' must be a string")),
			(
				EExpression::not(EExpression::func("isTimeUnit", vec![unit.clone()])),
				fail(5166503, "$dateDiff parameter 'unit' must be a valid time unit"),
			),
		]);
		let mut call_args = vec![tzdb.clone(), start.clone(), end.clone(), unit.clone(), tz.clone()];
		if has_start_of_week {
			let sow = &r[4];
			cases.push((
				EExpression::and(unit_is_week.clone(), non_string(sow)),
				fail(5338801, "$dateDiff parameter 'startOfWeek' must be a string"),
			));
			cases.push((
				EExpression::and(unit_is_week.clone(), EExpression::not(EExpression::func("isDayOfWeek", vec![sow.clone()]))),
				fail(5338802, "$dateDiff parameter 'startOfWeek' must be a valid day of the week"),
			));
			call_args.push(EExpression::if_then_else(unit_is_week, sow.clone(), EExpression::string("sun")));
		}
		let body = multi_branch(cases, EExpression::func("dateDiff", call_args));
		EExpression::local_bind(week_frame, vec![string_eq(unit, "week")], body)
	}))
}

fn date_add(ctx: &mut ExpressionVisitorContext<'_>, mut args: Vec<EExpression>, subtract: bool, has_timezone: bool) -> Result<EExpression> {
	let tzdb = ctx.time_zone_db_var()?;
	timezone_or_utc(&mut args, has_timezone);
	let name = if subtract { "$dateSubtract" } else { "$dateAdd" };
	let frames = ctx.frame_ids();
	let amount_frame = frames.generate();
	Ok(local_bind(frames, args, |r| {
		let (start, unit, amount, tz) = (&r[0], &r[1], &r[2], &r[3]);
		let converted = EExpression::num_convert(amount.clone(), TypeTags::NumberInt64);
		let converted = if subtract { EExpression::negate(converted) } else { converted };
		let amount_long = EExpression::local(amount_frame, 0);
		let body = multi_branch(
			vec![
				(any_null(r), null()),
				(non_string(tz), fail(5166601, format!("{name} expects timezone argument of type string"))),
				(EExpression::not(is_timezone(&tzdb, tz)), fail(5166602, format!("{name} expects a valid timezone"))),
				(
					EExpression::not(is_date_like(start)),
					fail(5166603, format!("{name} must have startDate argument convertable to date")),
				),
				(non_string(unit), fail(5166604, format!("{name} expects unit argument of type string"))),
				(
					EExpression::not(EExpression::func("isTimeUnit", vec![unit.clone()])),
					fail(5166605, format!("{name} expects a valid time unit")),
				),
				(
					EExpression::not(EExpression::func("exists", vec![amount_long.clone()])),
					fail(5166606, format!("{name} expects amount argument to be an integer number")),
				),
			],
			EExpression::func("dateAdd", vec![tzdb.clone(), start.clone(), unit.clone(), amount_long, tz.clone()]),
		);
		EExpression::local_bind(amount_frame, vec![converted], body)
	}))
}

fn regex_null_response(op: RegexOp) -> EExpression {
	match op {
		RegexOp::Match => EExpression::constant(false),
		RegexOp::Find => null(),
		RegexOp::FindAll => EExpression::func("newArray", vec![]),
	}
}

/// The pattern and options of a regex whose operands are known while compiling
fn constant_regex(pattern: &Value, options: Option<&Value>) -> Option<Option<(String, String)>> {
	let options = match options {
		None | Some(Value::Null) => String::new(),
		Some(v) => v.string_view()?.to_string(),
	};
	let (pattern, options) = match pattern {
		Value::Null => return Some(None),
		v if v.string_view().is_some() => (v.string_view()?.to_string(), options),
		v => {
			let re = v.bson_regex_view()?;
			match (re.flags.is_empty(), options.is_empty()) {
				(_, true) => (re.pattern.to_string(), re.flags.to_string()),
				(true, false) => (re.pattern.to_string(), options),
				(false, false) => return None,
			}
		}
	};
	if pattern.contains('\0') || options.contains('\0') {
		return None;
	}
	Some(Some((pattern, options)))
}

fn regex(ctx: &mut ExpressionVisitorContext<'_>, mut args: Vec<EExpression>, op: RegexOp, has_options: bool) -> Result<EExpression> {
	let name = op.name();
	let builtin = &name[1..];
	let error = |code: i32, message: &str| fail(code, format!("{name}: {message}"));
	let options = if has_options { args.pop() } else { None };
	let (Some(pattern), Some(input)) = (args.pop(), args.pop()) else {
		bail!(Error::assertion(5611709, format!("{name} expects an input and a pattern")));
	};

	let constant = match (pattern.as_constant(), options.as_ref().map(|o| o.as_constant())) {
		(Some(p), None) => constant_regex(p, None),
		(Some(p), Some(Some(o))) => constant_regex(p, Some(o)),
		_ => None,
	};

	let frames = ctx.frame_ids();
	let outer = frames.generate();
	let result_frame = frames.generate();
	let input_var = EExpression::local(outer, 0);
	let run = |compiled: EExpression| {
		let result = EExpression::local(result_frame, 0);
		EExpression::local_bind(
			result_frame,
			vec![EExpression::func(builtin, vec![compiled, input_var.clone()])],
			EExpression::if_then_else(
				EExpression::func("exists", vec![result.clone()]),
				result,
				error(5073403, "error occurred while executing the regular expression"),
			),
		)
	};

	let mut binds = vec![input];
	let evaluated = match constant {
		Some(None) => regex_null_response(op),
		Some(Some((p, o))) => {
			let compiled = vm::regex::compile(&Value::new_string(&p), &Value::new_string(&o))?;
			run(EExpression::Constant(compiled))
		}
		None => {
			binds.push(pattern);
			let pattern_var = EExpression::local(outer, 1);
			let is_bson_regex = EExpression::type_match(pattern_var.clone(), BsonType::Regex.mask());
			let pattern_arg = multi_branch(
				vec![
					(
						EExpression::func("isString", vec![pattern_var.clone()]),
						EExpression::if_then_else(
							EExpression::func("hasNullBytes", vec![pattern_var.clone()]),
							error(5126602, "regex pattern must not have embedded null bytes"),
							pattern_var.clone(),
						),
					),
					(is_bson_regex.clone(), EExpression::func("getRegexPattern", vec![pattern_var.clone()])),
				],
				error(5126601, "regex pattern must have either string or BSON RegEx type"),
			);
			let on_pattern = |options: EExpression, run: &dyn Fn(EExpression) -> EExpression| {
				EExpression::if_then_else(
					EExpression::func("isNull", vec![pattern_var.clone()]),
					regex_null_response(op),
					run(EExpression::func("regexCompile", vec![pattern_arg.clone(), options])),
				)
			};
			match options {
				None => {
					let options_arg = EExpression::if_then_else(
						is_bson_regex.clone(),
						EExpression::func("getRegexFlags", vec![pattern_var.clone()]),
						EExpression::string(""),
					);
					on_pattern(options_arg, &run)
				}
				Some(options) => {
					binds.push(options);
					let options_var = EExpression::local(outer, 2);
					let string_options = multi_branch(
						vec![
							(
								EExpression::func("isString", vec![options_var.clone()]),
								EExpression::if_then_else(
									EExpression::func("hasNullBytes", vec![options_var.clone()]),
									error(5126604, "regex flags must not have embedded null bytes"),
									options_var.clone(),
								),
							),
							(EExpression::func("isNull", vec![options_var.clone()]), EExpression::string("")),
						],
						error(5126603, "regex flags must have either string or null type"),
					);
					let frames = ctx.frame_ids();
					let string_frame = frames.generate();
					let flags_frame = frames.generate();
					let merged_frame = frames.generate();
					let string_var = EExpression::local(string_frame, 0);
					let flags_var = EExpression::local(flags_frame, 0);
					let merged = EExpression::local_bind(
						flags_frame,
						vec![EExpression::func("getRegexFlags", vec![pattern_var.clone()])],
						multi_branch(
							vec![
								(string_eq(&string_var, ""), flags_var.clone()),
								(string_eq(&flags_var, ""), string_var.clone()),
							],
							error(5126605, "regex options cannot be specified in both BSON RegEx and 'options' field"),
						),
					);
					let options_arg = EExpression::local_bind(
						string_frame,
						vec![string_options],
						EExpression::if_then_else(is_bson_regex.clone(), merged, string_var.clone()),
					);
					// Options are validated even when the pattern is null
					let merged_var = EExpression::local(merged_frame, 0);
					EExpression::local_bind(merged_frame, vec![options_arg], on_pattern(merged_var, &run))
				}
			}
		}
	};

	Ok(EExpression::local_bind(
		outer,
		binds,
		multi_branch(
			vec![
				(null_or_missing(&input_var), regex_null_response(op)),
				(non_string(&input_var), error(5073401, "input must be of type string")),
			],
			evaluated,
		),
	))
}

fn set_op(ctx: &mut ExpressionVisitorContext<'_>, args: Vec<EExpression>, op: SetOp) -> EExpression {
	let name = op.name();
	let builtin = &name[1..];
	let collator = ctx.collator_var();
	if args.is_empty() {
		return EExpression::func(builtin, vec![]);
	}
	local_bind(ctx.frame_ids(), args, |r| {
		let invoke = match collator {
			Some(collator) => {
				let coll_name = format!("coll{}{}", builtin[..1].to_uppercase(), &builtin[1..]);
				let mut coll_args = vec![collator];
				coll_args.extend(r.iter().cloned());
				EExpression::func(&coll_name, coll_args)
			}
			None => call(builtin, r),
		};
		multi_branch(
			vec![
				(any_null(r), null()),
				(
					any_of(r.iter().map(non_array).collect()),
					fail(5126900, format!("All operands of {name} must be arrays.")),
				),
			],
			invoke,
		)
	})
}

fn lower_bound(bound: Bound) -> String {
	match bound {
		Bound::Inclusive(b) => format!("[{b}"),
		Bound::Exclusive(b) => format!("({b}"),
	}
}

fn upper_bound(bound: Bound) -> String {
	match bound {
		Bound::Inclusive(b) => format!("{b}]"),
		Bound::Exclusive(b) => format!("{b})"),
	}
}

fn trig(ctx: &mut ExpressionVisitorContext<'_>, args: Vec<EExpression>, op: TrigOp) -> EExpression {
	let name = op.name();
	let builtin = op.builtin();
	local_bind(ctx.frame_ids(), args, |r| {
		let x = &r[0];
		let Some((lower, upper)) = op.bounds() else {
			return multi_branch(
				vec![
					(null_or_missing(x), null()),
					(EExpression::func("isNumber", vec![x.clone()]), call(builtin, r)),
				],
				fail(4995501, format!("{name} supports only numeric types")),
			);
		};
		let check = |bound: Bound, inclusive: EPrimBinaryOp, exclusive: EPrimBinaryOp| match bound {
			Bound::Inclusive(b) => EExpression::binary(inclusive, x.clone(), EExpression::constant(b)),
			Bound::Exclusive(b) => EExpression::binary(exclusive, x.clone(), EExpression::constant(b)),
		};
		let in_bounds = EExpression::and(
			check(lower, EPrimBinaryOp::GreaterEq, EPrimBinaryOp::Greater),
			check(upper, EPrimBinaryOp::LessEq, EPrimBinaryOp::Less),
		);
		multi_branch(
			vec![
				(null_or_missing(x), null()),
				(non_numeric(x), fail(4995502, format!("{name} supports only numeric types"))),
				(EExpression::func("isNaN", vec![x.clone()]), x.clone()),
				(in_bounds, call(builtin, r)),
			],
			fail(
				4995503,
				format!("Cannot apply {name}, value must be in {}, {}", lower_bound(lower), upper_bound(upper)),
			),
		)
	})
}

fn atan2(ctx: &mut ExpressionVisitorContext<'_>, args: Vec<EExpression>) -> EExpression {
	local_bind(ctx.frame_ids(), args, |r| {
		multi_branch(
			vec![
				(any_null(r), null()),
				(
					EExpression::and(
						EExpression::func("isNumber", vec![r[0].clone()]),
						EExpression::func("isNumber", vec![r[1].clone()]),
					),
					call("atan2", r),
				),
			],
			fail(5688500, "$atan2 supports only numeric types"),
		)
	})
}
