//! Numeric builtins.
//!
//! Binary operations run in the widest numeric type of their operands. Integer operations
//! which overflow are retried in the next wider type: `Int32` in `Int64`, and `Int64` in
//! `Decimal`. Double operations are never checked.

use anyhow::{Result, bail};
use crate::err::Error;
use crate::val::decimal::Rounding;
use crate::val::tags::widest_numerical_type;
use crate::val::{Collator, Decimal, TypeTags, Value, compare_value};

const DIVIDE_BY_ZERO: i32 = 4848401;
const MOD_BY_ZERO: i32 = 4848403;
const DATE_OVERFLOW: i32 = 15;

fn int32(v: &Value) -> i32 {
	match v {
		Value::NumberInt32(i) => *i,
		_ => 0,
	}
}

fn int64(v: &Value) -> i64 {
	match v {
		Value::NumberInt32(i) => *i as i64,
		Value::NumberInt64(i) => *i,
		_ => 0,
	}
}

struct Ops {
	int32: fn(i32, i32) -> Option<i32>,
	int64: fn(i64, i64) -> Option<i64>,
	double: fn(f64, f64) -> f64,
	decimal: fn(Decimal, Decimal) -> Option<Decimal>,
}

fn numeric(lhs: &Value, rhs: &Value, ops: &Ops) -> Option<Value> {
	let widest = widest_numerical_type(lhs.tag(), rhs.tag())?;
	let decimal = |l: Decimal, r: Decimal| (ops.decimal)(l, r).map(Value::decimal).unwrap_or_default();
	Some(match widest {
		TypeTags::NumberInt32 => match (ops.int32)(int32(lhs), int32(rhs)) {
			Some(v) => Value::NumberInt32(v),
			None => match (ops.int64)(int64(lhs), int64(rhs)) {
				Some(v) => Value::NumberInt64(v),
				None => decimal(Decimal::from(int64(lhs)), Decimal::from(int64(rhs))),
			},
		},
		TypeTags::NumberInt64 => match (ops.int64)(int64(lhs), int64(rhs)) {
			Some(v) => Value::NumberInt64(v),
			None => decimal(Decimal::from(int64(lhs)), Decimal::from(int64(rhs))),
		},
		TypeTags::NumberDouble => Value::NumberDouble((ops.double)(lhs.to_f64()?, rhs.to_f64()?)),
		_ => decimal(lhs.to_decimal()?, rhs.to_decimal()?),
	})
}

const ADD: Ops = Ops {
	int32: i32::checked_add,
	int64: i64::checked_add,
	double: |l, r| l + r,
	decimal: Decimal::checked_add,
};

const SUB: Ops = Ops {
	int32: i32::checked_sub,
	int64: i64::checked_sub,
	double: |l, r| l - r,
	decimal: Decimal::checked_sub,
};

const MUL: Ops = Ops {
	int32: i32::checked_mul,
	int64: i64::checked_mul,
	double: |l, r| l * r,
	decimal: Decimal::checked_mul,
};

/// Converts a number of milliseconds to add to a date, rounding half away from zero
fn millis_of(n: &Value) -> Option<i64> {
	match n {
		Value::NumberInt32(_) | Value::NumberInt64(_) => Some(int64(n)),
		Value::NumberDouble(d) => {
			let r = d.round();
			(r.is_finite() && r >= i64::MIN as f64 && r < i64::MAX as f64).then_some(r as i64)
		}
		Value::NumberDecimal(d) => d.round_with(Rounding::HalfUp).to_i64_exact(),
		_ => None,
	}
}

fn date_plus(millis: i64, n: &Value) -> Result<Value> {
	match millis_of(n).and_then(|m| millis.checked_add(m)) {
		Some(v) => Ok(Value::Date(v)),
		None => bail!(Error::fail(DATE_OVERFLOW, "date overflow in $add")),
	}
}

pub fn add(lhs: &Value, rhs: &Value) -> Result<Value> {
	if let Some(v) = numeric(lhs, rhs, &ADD) {
		return Ok(v);
	}
	match (lhs, rhs) {
		(Value::Date(d), n) | (n, Value::Date(d)) if n.tag().is_number() => date_plus(*d, n),
		_ => Ok(Value::Nothing),
	}
}

pub fn sub(lhs: &Value, rhs: &Value) -> Value {
	if let Some(v) = numeric(lhs, rhs, &SUB) {
		return v;
	}
	match (lhs, rhs) {
		(Value::Date(l), Value::Date(r)) => l.checked_sub(*r).map(Value::NumberInt64).unwrap_or_default(),
		(Value::Date(d), n) if n.tag().is_number() => millis_of(n)
			.and_then(|m| d.checked_sub(m))
			.map(Value::Date)
			.unwrap_or_default(),
		_ => Value::Nothing,
	}
}

pub fn mul(lhs: &Value, rhs: &Value) -> Value {
	numeric(lhs, rhs, &MUL).unwrap_or_default()
}

fn is_zero(v: &Value) -> bool {
	match v {
		Value::NumberInt32(i) => *i == 0,
		Value::NumberInt64(i) => *i == 0,
		Value::NumberDouble(d) => *d == 0.0,
		Value::NumberDecimal(d) => d.is_zero(),
		_ => false,
	}
}

/// Divides two numbers. Integers divide as doubles.
pub fn div(lhs: &Value, rhs: &Value) -> Result<Value> {
	let Some(widest) = widest_numerical_type(lhs.tag(), rhs.tag()) else {
		return Ok(Value::Nothing);
	};
	uassert!(!is_zero(rhs), DIVIDE_BY_ZERO, "can't $divide by zero");
	Ok(match widest {
		TypeTags::NumberDecimal => match (lhs.to_decimal(), rhs.to_decimal()) {
			(Some(l), Some(r)) => l.checked_div(r).map(Value::decimal).unwrap_or_default(),
			_ => Value::Nothing,
		},
		_ => match (lhs.to_f64(), rhs.to_f64()) {
			(Some(l), Some(r)) => Value::NumberDouble(l / r),
			_ => Value::Nothing,
		},
	})
}

/// The remainder of a division, which keeps the sign of the dividend
pub fn modulo(lhs: &Value, rhs: &Value) -> Result<Value> {
	let Some(widest) = widest_numerical_type(lhs.tag(), rhs.tag()) else {
		return Ok(Value::Nothing);
	};
	uassert!(!is_zero(rhs), MOD_BY_ZERO, "can't $mod by zero");
	Ok(match widest {
		TypeTags::NumberInt32 => Value::NumberInt32(int32(lhs).wrapping_rem(int32(rhs))),
		TypeTags::NumberInt64 => Value::NumberInt64(int64(lhs).wrapping_rem(int64(rhs))),
		TypeTags::NumberDouble => match (lhs.to_f64(), rhs.to_f64()) {
			(Some(l), Some(r)) => Value::NumberDouble(l % r),
			_ => Value::Nothing,
		},
		_ => match (lhs.to_decimal(), rhs.to_decimal()) {
			(Some(l), Some(r)) => l.checked_rem(r).map(Value::decimal).unwrap_or_default(),
			_ => Value::Nothing,
		},
	})
}

pub fn negate(v: &Value) -> Value {
	match v {
		Value::NumberInt32(i) => match i.checked_neg() {
			Some(n) => Value::NumberInt32(n),
			None => Value::NumberInt64(-(*i as i64)),
		},
		Value::NumberInt64(i) => match i.checked_neg() {
			Some(n) => Value::NumberInt64(n),
			None => Value::decimal(-Decimal::from(*i)),
		},
		Value::NumberDouble(d) => Value::NumberDouble(-d),
		Value::NumberDecimal(d) => Value::decimal(-**d),
		_ => Value::Nothing,
	}
}

pub fn not(v: &Value) -> Value {
	match v {
		Value::Boolean(b) => Value::Boolean(!b),
		_ => Value::Nothing,
	}
}

/// Orders any two values. Missing operands are not ordered.
pub fn compare3way(lhs: &Value, rhs: &Value, collator: Option<&dyn Collator>) -> Value {
	if lhs.is_nothing() || rhs.is_nothing() {
		return Value::Nothing;
	}
	compare_value(lhs, rhs, collator)
}

pub fn abs(v: &Value) -> Value {
	match v {
		Value::NumberInt32(i) => match i.checked_abs() {
			Some(a) => Value::NumberInt32(a),
			None => Value::NumberInt64(-(*i as i64)),
		},
		Value::NumberInt64(i) => i.checked_abs().map(Value::NumberInt64).unwrap_or_default(),
		Value::NumberDouble(d) => Value::NumberDouble(d.abs()),
		Value::NumberDecimal(d) => Value::decimal(d.abs()),
		_ => Value::Nothing,
	}
}

fn rounding(v: &Value, double: fn(f64) -> f64, decimal: fn(Decimal) -> Decimal) -> Value {
	match v {
		Value::NumberInt32(_) | Value::NumberInt64(_) => v.clone(),
		Value::NumberDouble(d) => Value::NumberDouble(double(*d)),
		Value::NumberDecimal(d) => Value::decimal(decimal(**d)),
		_ => Value::Nothing,
	}
}

pub fn ceil(v: &Value) -> Value {
	rounding(v, f64::ceil, Decimal::ceil)
}

pub fn floor(v: &Value) -> Value {
	rounding(v, f64::floor, Decimal::floor)
}

pub fn trunc(v: &Value) -> Value {
	rounding(v, f64::trunc, Decimal::trunc)
}

/// Applies a function which is only defined above (or at) a lower bound. Operands outside the
/// domain produce `Nothing`, except NaN which propagates.
fn bounded(
	v: &Value,
	inclusive: bool,
	double: fn(f64) -> f64,
	decimal: fn(Decimal) -> Decimal,
) -> Value {
	let in_domain = |d: f64| if inclusive { d >= 0.0 } else { d > 0.0 };
	match v {
		Value::NumberInt32(_) | Value::NumberInt64(_) | Value::NumberDouble(_) => match v.to_f64() {
			Some(d) if d.is_nan() || in_domain(d) => Value::NumberDouble(double(d)),
			_ => Value::Nothing,
		},
		Value::NumberDecimal(d) => {
			let ok = d.is_nan() || if inclusive { !d.is_sign_negative() || d.is_zero() } else { **d > Decimal::ZERO };
			if ok {
				Value::decimal(decimal(**d))
			} else {
				Value::Nothing
			}
		}
		_ => Value::Nothing,
	}
}

pub fn exp(v: &Value) -> Value {
	match v {
		Value::NumberDecimal(d) => Value::decimal(d.exp()),
		_ => v.to_f64().map(|d| Value::NumberDouble(d.exp())).unwrap_or_default(),
	}
}

pub fn ln(v: &Value) -> Value {
	bounded(v, false, f64::ln, Decimal::ln)
}

pub fn log10(v: &Value) -> Value {
	bounded(v, false, f64::log10, Decimal::log10)
}

pub fn sqrt(v: &Value) -> Value {
	bounded(v, true, f64::sqrt, Decimal::sqrt)
}

/// Sums numbers, and at most one date, without intermediate overflow.
///
/// The result has the widest type of the inputs. An integer sum which no longer fits its type
/// widens to `Int64` and then to a double. A date among the inputs makes the result a date.
pub fn double_double_sum(args: &[Value]) -> Result<Value> {
	let mut widest = TypeTags::NumberInt32;
	let mut date = None;
	for arg in args {
		match arg {
			Value::Date(ms) if date.is_none() => date = Some(*ms),
			v if v.tag().is_number() => {
				widest = widest_numerical_type(widest, v.tag()).unwrap_or(widest);
			}
			_ => return Ok(Value::Nothing),
		}
	}
	let numbers = args.iter().filter(|v| v.tag().is_number());
	let sum = match widest {
		TypeTags::NumberDecimal => {
			let mut total = Decimal::ZERO;
			for v in numbers {
				let Some(next) = v.to_decimal().and_then(|d| total.checked_add(d)) else {
					return Ok(Value::Nothing);
				};
				total = next;
			}
			Value::decimal(total)
		}
		TypeTags::NumberDouble => Value::NumberDouble(kahan_sum(numbers.filter_map(Value::to_f64))),
		_ => {
			let total: i128 = numbers.map(|v| int64(v) as i128).sum();
			match (widest, i32::try_from(total), i64::try_from(total)) {
				(TypeTags::NumberInt32, Ok(small), _) => Value::NumberInt32(small),
				(_, _, Ok(long)) => Value::NumberInt64(long),
				_ => Value::NumberDouble(total as f64),
			}
		}
	};
	match date {
		Some(ms) => date_plus(ms, &sum),
		None => Ok(sum),
	}
}

fn kahan_sum(values: impl Iterator<Item = f64>) -> f64 {
	let mut sum = 0.0;
	let mut compensation = 0.0;
	for v in values {
		let t = sum + v;
		if sum.abs() >= v.abs() {
			compensation += (sum - t) + v;
		} else {
			compensation += (v - t) + sum;
		}
		sum = t;
	}
	let total = sum + compensation;
	if total.is_nan() && !sum.is_nan() { sum } else { total }
}

/// Applies a trigonometric function. Decimal operands are evaluated in double precision and
/// converted back.
pub fn trig(name: &str, v: &Value) -> Value {
	let f: fn(f64) -> f64 = match name {
		"acos" => f64::acos,
		"acosh" => f64::acosh,
		"asin" => f64::asin,
		"asinh" => f64::asinh,
		"atan" => f64::atan,
		"atanh" => f64::atanh,
		"cos" => f64::cos,
		"cosh" => f64::cosh,
		"sin" => f64::sin,
		"sinh" => f64::sinh,
		"tan" => f64::tan,
		"tanh" => f64::tanh,
		"degreesToRadians" => f64::to_radians,
		"radiansToDegrees" => f64::to_degrees,
		_ => return Value::Nothing,
	};
	match v {
		Value::NumberDecimal(_) => {
			v.to_f64().map(|d| Value::decimal(Decimal::from_f64(f(d)))).unwrap_or_default()
		}
		_ => v.to_f64().map(|d| Value::NumberDouble(f(d))).unwrap_or_default(),
	}
}

pub fn atan2(y: &Value, x: &Value) -> Value {
	let Some(widest) = widest_numerical_type(y.tag(), x.tag()) else {
		return Value::Nothing;
	};
	let (Some(yf), Some(xf)) = (y.to_f64(), x.to_f64()) else {
		return Value::Nothing;
	};
	let r = yf.atan2(xf);
	match widest {
		TypeTags::NumberDecimal => Value::decimal(Decimal::from_f64(r)),
		_ => Value::NumberDouble(r),
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;
	use crate::err::code_of;

	fn dec(s: &str) -> Value {
		Value::decimal(s.parse().unwrap())
	}

	#[rstest]
	#[case::int32(Value::NumberInt32(2), Value::NumberInt32(3), "5", TypeTags::NumberInt32)]
	#[case::int32_overflow(
		Value::NumberInt32(i32::MAX),
		Value::NumberInt32(1),
		"2147483648",
		TypeTags::NumberInt64
	)]
	#[case::int64_overflow(
		Value::NumberInt64(i64::MAX),
		Value::NumberInt32(1),
		"9223372036854775808",
		TypeTags::NumberDecimal
	)]
	#[case::mixed(Value::NumberInt32(1), Value::NumberDouble(0.5), "1.5", TypeTags::NumberDouble)]
	#[case::decimal(Value::NumberInt64(1), dec("0.25"), "1.25", TypeTags::NumberDecimal)]
	#[case::date(Value::Date(1000), Value::NumberDouble(0.6), "1001", TypeTags::Date)]
	#[case::not_a_number(Value::NumberInt32(1), Value::new_string("x"), "Nothing", TypeTags::Nothing)]
	fn addition(
		#[case] lhs: Value,
		#[case] rhs: Value,
		#[case] expected: &str,
		#[case] tag: TypeTags,
	) {
		let v = add(&lhs, &rhs).unwrap();
		assert_eq!(v.to_string(), expected);
		assert_eq!(v.tag(), tag);
	}

	#[test]
	fn decimals_keep_their_range_and_special_values() {
		assert_eq!(mul(&dec("1E+40"), &dec("1E+40")).to_string(), "1E+80");
		let nan = add(&dec("NaN"), &Value::NumberInt32(1)).unwrap();
		assert_eq!((nan.tag(), nan.to_string().as_str()), (TypeTags::NumberDecimal, "NaN"));
		let inf = sub(&dec("-Infinity"), &Value::NumberDouble(1.0));
		assert_eq!((inf.tag(), inf.to_string().as_str()), (TypeTags::NumberDecimal, "-Infinity"));
		let wide = add(&dec("1234567890123456789012345678901233"), &Value::NumberInt32(1)).unwrap();
		assert_eq!(wide.to_string(), "1234567890123456789012345678901234");
	}

	#[test]
	fn date_arithmetic() {
		assert!(add(&Value::Date(1), &Value::Date(2)).unwrap().is_nothing());
		assert_eq!(sub(&Value::Date(10), &Value::Date(4)).tag(), TypeTags::NumberInt64);
		assert_eq!(sub(&Value::Date(10), &Value::NumberInt32(4)).to_string(), "6");
		let err = add(&Value::Date(i64::MAX), &Value::NumberInt32(1)).unwrap_err();
		assert_eq!(code_of(&err), Some(DATE_OVERFLOW));
	}

	#[test]
	fn division() {
		assert_eq!(div(&Value::NumberInt32(1), &Value::NumberInt32(4)).unwrap().to_string(), "0.25");
		assert_eq!(div(&dec("1"), &Value::NumberInt32(4)).unwrap().tag(), TypeTags::NumberDecimal);
		let err = div(&Value::NumberInt32(1), &Value::NumberDouble(0.0)).unwrap_err();
		assert_eq!(code_of(&err), Some(DIVIDE_BY_ZERO));
		assert!(div(&Value::Null, &Value::NumberInt32(0)).unwrap().is_nothing());
	}

	#[rstest]
	#[case::int32(Value::NumberInt32(7), Value::NumberInt32(-3), "1")]
	#[case::min_by_minus_one(Value::NumberInt32(i32::MIN), Value::NumberInt32(-1), "0")]
	#[case::double(Value::NumberDouble(-7.5), Value::NumberInt32(2), "-1.5")]
	#[case::decimal(dec("7.5"), Value::NumberInt32(2), "1.5")]
	#[case::decimal_by_infinity(dec("7.5"), dec("Infinity"), "7.5")]
	fn remainder(#[case] lhs: Value, #[case] rhs: Value, #[case] expected: &str) {
		assert_eq!(modulo(&lhs, &rhs).unwrap().to_string(), expected);
	}

	#[test]
	fn remainder_by_zero() {
		let err = modulo(&Value::NumberInt32(1), &Value::NumberInt64(0)).unwrap_err();
		assert_eq!(code_of(&err), Some(MOD_BY_ZERO));
	}

	#[rstest]
	#[case::int32_min(abs(&Value::NumberInt32(i32::MIN)), "2147483648")]
	#[case::int64_min(abs(&Value::NumberInt64(i64::MIN)), "Nothing")]
	#[case::ceil_decimal(ceil(&dec("-1.5")), "-1")]
	#[case::floor_decimal(floor(&dec("-1.5")), "-2")]
	#[case::floor_int(floor(&Value::NumberInt32(3)), "3")]
	#[case::ln_zero(ln(&Value::NumberInt32(0)), "Nothing")]
	#[case::ln_nan(ln(&Value::NumberDouble(f64::NAN)), "NaN")]
	#[case::sqrt_zero(sqrt(&Value::NumberInt32(0)), "0")]
	#[case::sqrt_negative(sqrt(&Value::NumberDouble(-1.0)), "Nothing")]
	#[case::log10(log10(&Value::NumberInt64(100)), "2")]
	#[case::not(not(&Value::Boolean(false)), "true")]
	#[case::not_number(not(&Value::NumberInt32(0)), "Nothing")]
	#[case::negate_min(negate(&Value::NumberInt32(i32::MIN)), "2147483648")]
	fn unary(#[case] actual: Value, #[case] expected: &str) {
		assert_eq!(actual.to_string(), expected);
	}

	#[test]
	fn sums() {
		let ints = [Value::NumberInt32(i32::MAX), Value::NumberInt32(1)];
		assert_eq!(double_double_sum(&ints).unwrap().tag(), TypeTags::NumberInt64);
		let with_date = [Value::NumberInt32(5), Value::Date(10), Value::NumberInt64(1)];
		assert_eq!(double_double_sum(&with_date).unwrap().to_string(), "16");
		let two_dates = [Value::Date(1), Value::Date(2)];
		assert!(double_double_sum(&two_dates).unwrap().is_nothing());
		let doubles = [Value::NumberDouble(0.1), Value::NumberDouble(0.2), Value::NumberDouble(-0.3)];
		assert!(double_double_sum(&doubles).unwrap().to_f64().unwrap().abs() < 1e-16);
	}

	#[test]
	fn trigonometry() {
		assert_eq!(trig("cos", &Value::NumberInt32(0)).to_string(), "1");
		assert_eq!(trig("sin", &dec("0")).tag(), TypeTags::NumberDecimal);
		assert!(trig("cos", &Value::Null).is_nothing());
		assert_eq!(atan2(&Value::NumberInt32(0), &Value::NumberInt32(1)).to_string(), "0");
	}
}
