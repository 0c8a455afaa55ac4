//! Scalar expression builders shared by the expression visitors.

use crate::sbe::{EExpression, EPrimBinaryOp, FrameIdGenerator};
use crate::val::tags::mask;
use crate::val::{TypeTags, Value};

/// A guard and the value an `if` chain yields when it holds
pub(crate) type CaseValuePair = (EExpression, EExpression);

pub(crate) fn null() -> EExpression {
	EExpression::null()
}

/// `true` when the value is missing, null or undefined
pub(crate) fn null_or_missing(e: &EExpression) -> EExpression {
	EExpression::or(
		EExpression::not(EExpression::func("exists", vec![e.clone()])),
		EExpression::type_match(e.clone(), mask::NULL | mask::UNDEFINED),
	)
}

pub(crate) fn non_numeric(e: &EExpression) -> EExpression {
	EExpression::not(EExpression::func("isNumber", vec![e.clone()]))
}

pub(crate) fn non_string(e: &EExpression) -> EExpression {
	EExpression::not(EExpression::func("isString", vec![e.clone()]))
}

pub(crate) fn non_array(e: &EExpression) -> EExpression {
	EExpression::not(EExpression::func("isArray", vec![e.clone()]))
}

pub(crate) fn non_object(e: &EExpression) -> EExpression {
	EExpression::not(EExpression::func("isObject", vec![e.clone()]))
}

pub(crate) fn is_date_like(e: &EExpression) -> EExpression {
	EExpression::type_match(e.clone(), mask::DATE_LIKE)
}

pub(crate) fn type_is(e: &EExpression, tag: TypeTags) -> EExpression {
	EExpression::type_match(e.clone(), tag.type_mask())
}

/// `true` when a number is below zero. NaN is not.
pub(crate) fn negative(e: &EExpression) -> EExpression {
	EExpression::fill_empty(
		EExpression::binary(EPrimBinaryOp::Less, e.clone(), EExpression::constant(0i64)),
		EExpression::constant(false),
	)
}

/// `true` when a number cannot be converted to a 32-bit integer without loss
pub(crate) fn not_representable_as_i32(e: &EExpression) -> EExpression {
	EExpression::not(EExpression::func(
		"exists",
		vec![EExpression::num_convert(e.clone(), TypeTags::NumberInt32)],
	))
}

pub(crate) fn string_eq(e: &EExpression, s: &str) -> EExpression {
	EExpression::fill_empty(
		EExpression::binary(EPrimBinaryOp::Eq, e.clone(), EExpression::string(s)),
		EExpression::constant(false),
	)
}

/// Folds expressions with `||`, left to right
pub(crate) fn any_of(exprs: Vec<EExpression>) -> EExpression {
	exprs.into_iter().reduce(EExpression::or).unwrap_or_else(|| EExpression::constant(false))
}

/// Folds expressions with `&&`, left to right
pub(crate) fn all_of(exprs: Vec<EExpression>) -> EExpression {
	exprs.into_iter().reduce(EExpression::and).unwrap_or_else(|| EExpression::constant(true))
}

/// Builds `if c1 then v1 else if c2 then v2 ... else default`
pub(crate) fn multi_branch(cases: Vec<CaseValuePair>, default: EExpression) -> EExpression {
	cases.into_iter().rev().fold(default, |otherwise, (cond, then)| EExpression::if_then_else(cond, then, otherwise))
}

/// Binds `values` in a fresh frame and builds the body over references to them
pub(crate) fn local_bind(
	frames: &mut FrameIdGenerator,
	values: Vec<EExpression>,
	body: impl FnOnce(&[EExpression]) -> EExpression,
) -> EExpression {
	let frame = frames.generate();
	let refs: Vec<EExpression> = (0..values.len()).map(|idx| EExpression::local(frame, idx)).collect();
	EExpression::local_bind(frame, values, body(&refs))
}

fn is_trivial(e: &EExpression) -> bool {
	matches!(e, EExpression::Constant(_) | EExpression::Variable(_) | EExpression::LocalVariable { .. })
}

/// The MQL truthiness of a value. Missing, null, undefined, `false` and any zero are false,
/// everything else is true.
pub(crate) fn coerce_to_bool(frames: &mut FrameIdGenerator, e: EExpression) -> EExpression {
	if let Some(Value::Boolean(b)) = e.as_constant() {
		return EExpression::constant(*b);
	}
	let build = |v: &EExpression| {
		all_of(vec![
			EExpression::func("exists", vec![v.clone()]),
			EExpression::not(EExpression::type_match(v.clone(), mask::NULL | mask::UNDEFINED)),
			EExpression::binary(
				EPrimBinaryOp::Neq,
				EExpression::binary(EPrimBinaryOp::Cmp3w, v.clone(), EExpression::constant(false)),
				EExpression::constant(0i64),
			),
			EExpression::binary(
				EPrimBinaryOp::Neq,
				EExpression::binary(EPrimBinaryOp::Cmp3w, v.clone(), EExpression::constant(0i64)),
				EExpression::constant(0i64),
			),
		])
	};
	if is_trivial(&e) {
		build(&e)
	} else {
		local_bind(frames, vec![e], |refs| build(&refs[0]))
	}
}
