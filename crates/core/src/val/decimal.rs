//! Decimal128 numbers.
//!
//! A [`Decimal`] carries at most 34 significant digits and an exponent within the decimal128
//! range, plus NaN and the two infinities. Finite arithmetic is carried out on [`D128`] and the
//! result is rounded back to 34 digits, half to even. Transcendental functions go through
//! `rust_decimal` when the operand fits it, and through a double otherwise.

use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter, Write};
use std::ops::Neg;
use std::str::FromStr;

use fastnum::decimal::{Context, Sign};
use fastnum::{D128, U128};
use rust_decimal::Decimal as Fixed;
use rust_decimal::MathematicalOps;

use crate::err::Error;

/// The number of significant digits a decimal holds
pub const MAX_DIGITS: u32 = 34;

const MAX_COEFFICIENT: u128 = 10u128.pow(MAX_DIGITS) - 1;
const MIN_EXPONENT: i32 = -6176;
const MAX_EXPONENT: i32 = 6111;
const EXPONENT_BIAS: i32 = 6176;
const EXPONENT_LIMIT: i64 = 1 << 24;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rounding {
	HalfEven,
	/// Half away from zero
	HalfUp,
	Ceiling,
	Floor,
	Down,
}

/// A decimal128 number. The coefficient of a finite value never exceeds 34 digits.
///
/// Equality and ordering are numeric: `1.50` equals `1.5`, and NaN equals itself and orders
/// below every other decimal.
#[derive(Clone, Copy, Debug)]
pub enum Decimal {
	Finite {
		negative: bool,
		coefficient: u128,
		exponent: i32,
	},
	Infinity {
		negative: bool,
	},
	NaN,
}

fn digit_count(c: u128) -> u32 {
	match c.checked_ilog10() {
		Some(n) => n + 1,
		None => 1,
	}
}

/// Divides `c` by `10^n`, rounding the dropped digits away with `mode`
fn shift_right(c: u128, n: u32, negative: bool, mode: Rounding) -> u128 {
	if n == 0 {
		return c;
	}
	let (quotient, remainder, half) = match 10u128.checked_pow(n) {
		Some(p) => (c / p, c % p, (c % p).cmp(&(p / 2))),
		None => (0, c, Ordering::Less),
	};
	let up = match mode {
		Rounding::HalfEven => {
			half == Ordering::Greater || (half == Ordering::Equal && quotient % 2 == 1)
		}
		Rounding::HalfUp => half != Ordering::Less,
		Rounding::Ceiling => remainder != 0 && !negative,
		Rounding::Floor => remainder != 0 && negative,
		Rounding::Down => false,
	};
	quotient + up as u128
}

impl Decimal {
	pub const ZERO: Decimal = Decimal::Finite {
		negative: false,
		coefficient: 0,
		exponent: 0,
	};
	pub const ONE: Decimal = Decimal::Finite {
		negative: false,
		coefficient: 1,
		exponent: 0,
	};
	pub const MAX: Decimal = Decimal::Finite {
		negative: false,
		coefficient: MAX_COEFFICIENT,
		exponent: MAX_EXPONENT,
	};
	pub const INFINITY: Decimal = Decimal::Infinity {
		negative: false,
	};
	pub const NEG_INFINITY: Decimal = Decimal::Infinity {
		negative: true,
	};

	/// Builds a finite decimal, rounding the coefficient to 34 digits and the exponent into
	/// range. Values too large for the exponent range become infinite.
	pub fn from_parts(negative: bool, coefficient: u128, exponent: i32) -> Decimal {
		let (mut c, mut e) = (coefficient, exponent);
		let digits = digit_count(c);
		if digits > MAX_DIGITS {
			let drop = digits - MAX_DIGITS;
			c = shift_right(c, drop, negative, Rounding::HalfEven);
			e = e.saturating_add(drop as i32);
			if c > MAX_COEFFICIENT {
				c /= 10;
				e = e.saturating_add(1);
			}
		}
		if e < MIN_EXPONENT {
			let drop = MIN_EXPONENT.abs_diff(e);
			c = shift_right(c, drop, negative, Rounding::HalfEven);
			e = MIN_EXPONENT;
		}
		if e > MAX_EXPONENT {
			if c == 0 {
				e = MAX_EXPONENT;
			}
			while e > MAX_EXPONENT && c * 10 <= MAX_COEFFICIENT {
				c *= 10;
				e -= 1;
			}
			if e > MAX_EXPONENT {
				return Decimal::Infinity {
					negative,
				};
			}
		}
		Decimal::Finite {
			negative,
			coefficient: c,
			exponent: e,
		}
	}

	/// `mantissa * 10^-scale`
	pub fn new(mantissa: i64, scale: u32) -> Decimal {
		Self::from_parts(mantissa < 0, mantissa.unsigned_abs() as u128, -(scale as i32))
	}

	pub fn is_nan(&self) -> bool {
		matches!(self, Decimal::NaN)
	}

	pub fn is_infinite(&self) -> bool {
		matches!(self, Decimal::Infinity { .. })
	}

	pub fn is_finite(&self) -> bool {
		matches!(self, Decimal::Finite { .. })
	}

	pub fn is_zero(&self) -> bool {
		matches!(
			self,
			Decimal::Finite {
				coefficient: 0,
				..
			}
		)
	}

	pub fn is_sign_negative(&self) -> bool {
		match self {
			Decimal::Finite {
				negative,
				..
			}
			| Decimal::Infinity {
				negative,
			} => *negative,
			Decimal::NaN => false,
		}
	}

	pub fn abs(self) -> Decimal {
		match self {
			Decimal::Finite {
				coefficient,
				exponent,
				..
			} => Decimal::Finite {
				negative: false,
				coefficient,
				exponent,
			},
			Decimal::Infinity {
				..
			} => Decimal::INFINITY,
			Decimal::NaN => Decimal::NaN,
		}
	}

	/// Strips trailing zeros, so that numerically equal decimals have equal parts
	pub fn normalized(self) -> Decimal {
		match self {
			Decimal::Finite {
				coefficient: 0,
				..
			} => Decimal::ZERO,
			Decimal::Finite {
				negative,
				mut coefficient,
				mut exponent,
			} => {
				while coefficient % 10 == 0 {
					coefficient /= 10;
					exponent += 1;
				}
				Decimal::Finite {
					negative,
					coefficient,
					exponent,
				}
			}
			other => other,
		}
	}

	// ------------------------------
	// Text
	// ------------------------------

	/// Parses a decimal string. Digits beyond the 34th are rounded half to even. `NaN`, `Inf`
	/// and `Infinity` are accepted in any case.
	pub fn parse(input: &str) -> Option<Decimal> {
		let (negative, body) = match input.as_bytes().first()? {
			b'-' => (true, &input[1..]),
			b'+' => (false, &input[1..]),
			_ => (false, input),
		};
		if body.eq_ignore_ascii_case("nan") {
			return Some(Decimal::NaN);
		}
		if body.eq_ignore_ascii_case("inf") || body.eq_ignore_ascii_case("infinity") {
			return Some(Decimal::Infinity {
				negative,
			});
		}
		let (mantissa, exponent) = match body.find(['e', 'E']) {
			Some(i) => (&body[..i], body[i + 1..].parse::<i64>().ok()?),
			None => (body, 0),
		};
		let (int, frac) = mantissa.split_once('.').unwrap_or((mantissa, ""));
		if int.is_empty() && frac.is_empty() {
			return None;
		}
		if !int.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
			return None;
		}
		let digits = format!("{int}{frac}");
		let significant = digits.trim_start_matches('0');
		let (kept, dropped) = significant.split_at(significant.len().min(MAX_DIGITS as usize));
		let mut coefficient: u128 = if kept.is_empty() {
			0
		} else {
			kept.parse().ok()?
		};
		if let Some(first) = dropped.bytes().next() {
			let tail = dropped.bytes().skip(1).any(|b| b != b'0');
			if first > b'5' || (first == b'5' && (tail || coefficient % 2 == 1)) {
				coefficient += 1;
			}
		}
		let exponent = exponent.clamp(-EXPONENT_LIMIT, EXPONENT_LIMIT) - frac.len() as i64
			+ dropped.len() as i64;
		let exponent = exponent.clamp(-EXPONENT_LIMIT, EXPONENT_LIMIT) as i32;
		Some(Self::from_parts(negative, coefficient, exponent))
	}

	// ------------------------------
	// Binary integer decimal
	// ------------------------------

	/// Reads the 16 little-endian bytes of an IEEE 754 decimal128 in binary integer encoding.
	/// Non-canonical coefficients read as zero.
	pub fn from_bid(bytes: [u8; 16]) -> Decimal {
		let bits = u128::from_le_bytes(bytes);
		let negative = bits >> 127 == 1;
		match (bits >> 122) & 0x1f {
			0x1f => return Decimal::NaN,
			0x1e => {
				return Decimal::Infinity {
					negative,
				};
			}
			_ => {}
		}
		let (exponent, coefficient) = if (bits >> 125) & 0b11 == 0b11 {
			(((bits >> 111) & 0x3fff) as i32, 0)
		} else {
			(((bits >> 113) & 0x3fff) as i32, bits & ((1u128 << 113) - 1))
		};
		Decimal::Finite {
			negative,
			coefficient: if coefficient > MAX_COEFFICIENT {
				0
			} else {
				coefficient
			},
			exponent: exponent - EXPONENT_BIAS,
		}
	}

	/// The 16 little-endian bytes of the decimal128 binary integer encoding
	pub fn to_bid(self) -> [u8; 16] {
		let sign = |negative: bool| (negative as u128) << 127;
		let bits = match self {
			Decimal::NaN => 0x1f << 122,
			Decimal::Infinity {
				negative,
			} => (0x1e << 122) | sign(negative),
			Decimal::Finite {
				negative,
				coefficient,
				exponent,
			} => {
				(((exponent + EXPONENT_BIAS) as u128 & 0x3fff) << 113)
					| (coefficient & ((1u128 << 113) - 1))
					| sign(negative)
			}
		};
		bits.to_le_bytes()
	}

	// ------------------------------
	// Conversions
	// ------------------------------

	fn to_d128(self) -> Option<D128> {
		let Decimal::Finite {
			negative,
			coefficient,
			exponent,
		} = self
		else {
			return None;
		};
		let digits = U128::from_u128(coefficient).ok()?;
		let sign = if negative {
			Sign::Minus
		} else {
			Sign::Plus
		};
		Some(D128::from_parts(digits, exponent, sign, Context::default()))
	}

	fn from_d128(d: D128) -> Decimal {
		let coefficient = d.digits().to_str_radix(10).parse::<u128>().unwrap_or_default();
		Self::from_parts(d.is_negative(), coefficient, -(d.fractional_digits_count() as i32))
	}

	fn to_fixed(self) -> Option<Fixed> {
		let Decimal::Finite {
			negative,
			coefficient,
			exponent,
		} = self.normalized()
		else {
			return None;
		};
		let (mantissa, scale) = if exponent >= 0 {
			(coefficient.checked_mul(10u128.checked_pow(exponent as u32)?)?, 0)
		} else {
			(coefficient, exponent.unsigned_abs())
		};
		let mantissa = i128::try_from(mantissa).ok()?;
		Fixed::try_from_i128_with_scale(if negative { -mantissa } else { mantissa }, scale).ok()
	}

	fn from_fixed(d: Fixed) -> Decimal {
		Self::from_parts(d.is_sign_negative(), d.mantissa().unsigned_abs(), -(d.scale() as i32))
	}

	/// The nearest double
	pub fn to_f64(self) -> f64 {
		match self {
			Decimal::NaN => f64::NAN,
			Decimal::Infinity {
				negative: false,
			} => f64::INFINITY,
			Decimal::Infinity {
				negative: true,
			} => f64::NEG_INFINITY,
			finite => finite.to_string().parse().unwrap_or(f64::NAN),
		}
	}

	fn from_f64_digits(d: f64, digits: usize) -> Decimal {
		if d.is_nan() {
			return Decimal::NaN;
		}
		if d.is_infinite() {
			return Decimal::Infinity {
				negative: d < 0.0,
			};
		}
		if d == 0.0 {
			return Self::from_parts(d.is_sign_negative(), 0, 0);
		}
		Self::parse(&format!("{d:.prec$e}", prec = digits - 1)).unwrap_or(Decimal::NaN)
	}

	/// Converts a double rounded to 15 significant digits
	pub fn from_f64(d: f64) -> Decimal {
		Self::from_f64_digits(d, 15)
	}

	/// Converts a double rounded to the full 34 significant digits
	pub fn from_f64_exact(d: f64) -> Decimal {
		Self::from_f64_digits(d, MAX_DIGITS as usize)
	}

	/// The value as a 64-bit integer if it is integral and in range
	pub fn to_i64_exact(self) -> Option<i64> {
		let Decimal::Finite {
			negative,
			coefficient,
			exponent,
		} = self.normalized()
		else {
			return None;
		};
		if exponent < 0 {
			return None;
		}
		let magnitude = coefficient.checked_mul(10u128.checked_pow(exponent as u32)?)?;
		let magnitude = i128::try_from(magnitude).ok()?;
		i64::try_from(if negative { -magnitude } else { magnitude }).ok()
	}

	// ------------------------------
	// Arithmetic
	// ------------------------------

	pub fn checked_add(self, rhs: Decimal) -> Option<Decimal> {
		Some(match (self, rhs) {
			(Decimal::NaN, _) | (_, Decimal::NaN) => Decimal::NaN,
			(
				Decimal::Infinity {
					negative: l,
				},
				Decimal::Infinity {
					negative: r,
				},
			) if l != r => Decimal::NaN,
			(Decimal::Infinity { .. }, _) => self,
			(_, Decimal::Infinity { .. }) => rhs,
			_ => Self::from_d128(self.to_d128()? + rhs.to_d128()?),
		})
	}

	pub fn checked_sub(self, rhs: Decimal) -> Option<Decimal> {
		self.checked_add(-rhs)
	}

	pub fn checked_mul(self, rhs: Decimal) -> Option<Decimal> {
		let negative = self.is_sign_negative() != rhs.is_sign_negative();
		Some(match (self, rhs) {
			(Decimal::NaN, _) | (_, Decimal::NaN) => Decimal::NaN,
			(Decimal::Infinity { .. }, other) | (other, Decimal::Infinity { .. }) => {
				if other.is_zero() {
					Decimal::NaN
				} else {
					Decimal::Infinity {
						negative,
					}
				}
			}
			_ => Self::from_d128(self.to_d128()? * rhs.to_d128()?),
		})
	}

	/// Divides, returning `None` for a zero divisor
	pub fn checked_div(self, rhs: Decimal) -> Option<Decimal> {
		if rhs.is_zero() {
			return None;
		}
		let negative = self.is_sign_negative() != rhs.is_sign_negative();
		Some(match (self, rhs) {
			(Decimal::NaN, _) | (_, Decimal::NaN) => Decimal::NaN,
			(Decimal::Infinity { .. }, Decimal::Infinity { .. }) => Decimal::NaN,
			(Decimal::Infinity { .. }, _) => Decimal::Infinity {
				negative,
			},
			(_, Decimal::Infinity { .. }) => Self::from_parts(negative, 0, 0),
			_ => Self::from_d128(self.to_d128()? / rhs.to_d128()?),
		})
	}

	/// The remainder of a truncating division, with the sign of the dividend
	pub fn checked_rem(self, rhs: Decimal) -> Option<Decimal> {
		if rhs.is_zero() {
			return None;
		}
		match (self, rhs) {
			(Decimal::NaN, _) | (_, Decimal::NaN) | (Decimal::Infinity { .. }, _) => {
				Some(Decimal::NaN)
			}
			(_, Decimal::Infinity { .. }) => Some(self),
			_ => {
				let quotient = self.checked_div(rhs)?.round_with(Rounding::Down);
				self.checked_sub(quotient.checked_mul(rhs)?)
			}
		}
	}

	/// Rounds to an integral value
	pub fn round_with(self, mode: Rounding) -> Decimal {
		match self {
			Decimal::Finite {
				negative,
				coefficient,
				exponent,
			} if exponent < 0 => Decimal::Finite {
				negative,
				coefficient: shift_right(coefficient, exponent.unsigned_abs(), negative, mode),
				exponent: 0,
			},
			other => other,
		}
	}

	pub fn round(self) -> Decimal {
		self.round_with(Rounding::HalfEven)
	}

	pub fn ceil(self) -> Decimal {
		self.round_with(Rounding::Ceiling)
	}

	pub fn floor(self) -> Decimal {
		self.round_with(Rounding::Floor)
	}

	pub fn trunc(self) -> Decimal {
		self.round_with(Rounding::Down)
	}

	fn transcendental(self, exact: fn(&Fixed) -> Option<Fixed>, approx: fn(f64) -> f64) -> Decimal {
		match self.to_fixed().and_then(|d| exact(&d)) {
			Some(out) => Self::from_fixed(out),
			None => Self::from_f64(approx(self.to_f64())),
		}
	}

	pub fn exp(self) -> Decimal {
		self.transcendental(Fixed::checked_exp, f64::exp)
	}

	pub fn ln(self) -> Decimal {
		self.transcendental(Fixed::checked_ln, f64::ln)
	}

	pub fn log10(self) -> Decimal {
		self.transcendental(Fixed::checked_log10, f64::log10)
	}

	pub fn sqrt(self) -> Decimal {
		self.transcendental(Fixed::sqrt, f64::sqrt)
	}

	// ------------------------------
	// Ordering
	// ------------------------------

	fn rank(&self) -> u8 {
		match self {
			Decimal::NaN => 0,
			Decimal::Infinity {
				negative: true,
			} => 1,
			d if d.is_zero() => 3,
			Decimal::Finite {
				negative: true,
				..
			} => 2,
			Decimal::Finite {
				..
			} => 4,
			Decimal::Infinity {
				negative: false,
			} => 5,
		}
	}
}

/// Compares two non-zero magnitudes
fn compare_magnitude(a: u128, x: i32, b: u128, y: i32) -> Ordering {
	let adjusted_a = x + digit_count(a) as i32;
	let adjusted_b = y + digit_count(b) as i32;
	if adjusted_a != adjusted_b {
		return adjusted_a.cmp(&adjusted_b);
	}
	let scale = |c: u128, by: i32| 10u128.checked_pow(by as u32).and_then(|p| c.checked_mul(p));
	match x.cmp(&y) {
		Ordering::Greater => scale(a, x - y).map_or(Ordering::Greater, |a| a.cmp(&b)),
		Ordering::Less => scale(b, y - x).map_or(Ordering::Less, |b| a.cmp(&b)),
		Ordering::Equal => a.cmp(&b),
	}
}

impl Ord for Decimal {
	fn cmp(&self, other: &Self) -> Ordering {
		let (l, r) = (self.rank(), other.rank());
		if l != r {
			return l.cmp(&r);
		}
		match (self, other) {
			(
				Decimal::Finite {
					negative,
					coefficient: a,
					exponent: x,
				},
				Decimal::Finite {
					coefficient: b,
					exponent: y,
					..
				},
			) if l != 3 => {
				let ord = compare_magnitude(*a, *x, *b, *y);
				if *negative {
					ord.reverse()
				} else {
					ord
				}
			}
			_ => Ordering::Equal,
		}
	}
}

impl PartialOrd for Decimal {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl PartialEq for Decimal {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == Ordering::Equal
	}
}

impl Eq for Decimal {}

impl Neg for Decimal {
	type Output = Decimal;

	fn neg(self) -> Decimal {
		match self {
			Decimal::Finite {
				negative,
				coefficient,
				exponent,
			} => Decimal::Finite {
				negative: !negative,
				coefficient,
				exponent,
			},
			Decimal::Infinity {
				negative,
			} => Decimal::Infinity {
				negative: !negative,
			},
			Decimal::NaN => Decimal::NaN,
		}
	}
}

impl From<i32> for Decimal {
	fn from(v: i32) -> Self {
		Decimal::from(v as i64)
	}
}

impl From<i64> for Decimal {
	fn from(v: i64) -> Self {
		Decimal::new(v, 0)
	}
}

impl FromStr for Decimal {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Decimal::parse(s).ok_or_else(|| Error::BadValue(format!("invalid decimal: {s}")))
	}
}

/// Renders plainly when the exponent is not positive and the adjusted exponent is at least -6,
/// and in scientific notation otherwise.
impl Display for Decimal {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let (negative, coefficient, exponent) = match *self {
			Decimal::NaN => return f.write_str("NaN"),
			Decimal::Infinity {
				negative,
			} => return f.write_str(if negative { "-Infinity" } else { "Infinity" }),
			Decimal::Finite {
				negative,
				coefficient,
				exponent,
			} => (negative, coefficient, exponent),
		};
		if negative {
			f.write_char('-')?;
		}
		let digits = coefficient.to_string();
		let len = digits.len() as i32;
		let adjusted = exponent + len - 1;
		if exponent > 0 || adjusted < -6 {
			let (first, rest) = digits.split_at(1);
			f.write_str(first)?;
			if !rest.is_empty() {
				write!(f, ".{rest}")?;
			}
			return write!(f, "E{adjusted:+}");
		}
		if exponent == 0 {
			return f.write_str(&digits);
		}
		let point = len + exponent;
		if point > 0 {
			let (int, frac) = digits.split_at(point as usize);
			write!(f, "{int}.{frac}")
		} else {
			write!(f, "0.{}{digits}", "0".repeat(point.unsigned_abs() as usize))
		}
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	fn d(s: &str) -> Decimal {
		Decimal::parse(s).unwrap()
	}

	#[rstest]
	#[case::plain("1.10", "1.10")]
	#[case::integer("-42", "-42")]
	#[case::small("0.0001", "0.0001")]
	#[case::tiny("1E-7", "1E-7")]
	#[case::large("1E+40", "1E+40")]
	#[case::positive_exponent("12e3", "1.2E+4")]
	#[case::full_width("1234567890123456789012345678901234", "1234567890123456789012345678901234")]
	#[case::rounded_half_even("12345678901234567890123456789012345", "1.234567890123456789012345678901234E+34")]
	#[case::rounded_up("12345678901234567890123456789012346", "1.234567890123456789012345678901235E+34")]
	#[case::nan("nan", "NaN")]
	#[case::negative_infinity("-Infinity", "-Infinity")]
	#[case::negative_zero("-0", "-0")]
	fn text(#[case] input: &str, #[case] expected: &str) {
		assert_eq!(d(input).to_string(), expected);
	}

	#[rstest]
	#[case::empty("")]
	#[case::sign_only("-")]
	#[case::letters("12a")]
	#[case::bare_exponent("1e")]
	fn rejects(#[case] input: &str) {
		assert!(Decimal::parse(input).is_none());
	}

	#[rstest]
	#[case::one("1")]
	#[case::negative("-12.345")]
	#[case::full_width("-1234567890123456789012345678901234")]
	#[case::large("9.999999999999999999999999999999999E+6144")]
	#[case::small("1E-6176")]
	#[case::nan("NaN")]
	#[case::infinity("-Infinity")]
	fn binary_encoding_is_lossless(#[case] input: &str) {
		let value = d(input);
		let back = Decimal::from_bid(value.to_bid());
		assert_eq!(back.to_string(), value.to_string());
	}

	#[test]
	fn known_encodings() {
		assert_eq!(Decimal::NaN.to_bid()[15], 0x7c);
		assert_eq!(Decimal::INFINITY.to_bid()[15], 0x78);
		assert_eq!(Decimal::NEG_INFINITY.to_bid()[15], 0xf8);
		// 1 with an exponent of zero is 0x3040 in the top two bytes
		let one = Decimal::ONE.to_bid();
		assert_eq!((one[0], one[14], one[15]), (1, 0x40, 0x30));
	}

	#[test]
	fn overflowing_exponents_saturate() {
		assert!(d("1E+7000").is_infinite());
		assert!(d("1E-7000").is_zero());
		assert_eq!(d("1E+6112").to_string(), "1.0E+6112");
	}

	#[rstest]
	#[case::equal_scales("1.50", "1.5", Ordering::Equal)]
	#[case::zeros("-0", "0E+10", Ordering::Equal)]
	#[case::negative("-2", "-10", Ordering::Greater)]
	#[case::magnitude("1E+40", "9999999999999999999999999999999999", Ordering::Greater)]
	#[case::nan_lowest("NaN", "-Infinity", Ordering::Less)]
	#[case::infinity_highest("Infinity", "1E+6000", Ordering::Greater)]
	fn ordering(#[case] lhs: &str, #[case] rhs: &str, #[case] expected: Ordering) {
		assert_eq!(d(lhs).cmp(&d(rhs)), expected);
		assert_eq!(d(rhs).cmp(&d(lhs)), expected.reverse());
	}

	#[test]
	fn special_values_propagate() {
		assert!(Decimal::NaN.checked_add(Decimal::ONE).unwrap().is_nan());
		assert!(Decimal::INFINITY.checked_add(Decimal::NEG_INFINITY).unwrap().is_nan());
		assert!(Decimal::INFINITY.checked_mul(Decimal::ZERO).unwrap().is_nan());
		assert_eq!(Decimal::NEG_INFINITY.checked_mul(d("-2")).unwrap(), Decimal::INFINITY);
		assert!(Decimal::ONE.checked_div(Decimal::ZERO).is_none());
		assert!(Decimal::ONE.checked_div(Decimal::INFINITY).unwrap().is_zero());
	}

	#[test]
	fn finite_arithmetic() {
		assert_eq!(d("0.1").checked_add(d("0.2")).unwrap(), d("0.3"));
		assert_eq!(d("1E+40").checked_mul(d("1E+40")).unwrap(), d("1E+80"));
		assert_eq!(d("7.5").checked_rem(d("2")).unwrap(), d("1.5"));
		assert_eq!(d("-7.5").checked_rem(d("2")).unwrap(), d("-1.5"));
		let third = Decimal::ONE.checked_div(d("3")).unwrap();
		assert_eq!(third.to_string(), "0.3333333333333333333333333333333333");
	}

	#[rstest]
	#[case::half_even_down("2.5", Rounding::HalfEven, "2")]
	#[case::half_even_up("3.5", Rounding::HalfEven, "4")]
	#[case::half_up("-2.5", Rounding::HalfUp, "-3")]
	#[case::ceiling("-1.5", Rounding::Ceiling, "-1")]
	#[case::floor("-1.5", Rounding::Floor, "-2")]
	#[case::down("-1.9", Rounding::Down, "-1")]
	#[case::integral("1E+3", Rounding::Floor, "1E+3")]
	fn rounding(#[case] input: &str, #[case] mode: Rounding, #[case] expected: &str) {
		assert_eq!(d(input).round_with(mode).to_string(), expected);
	}

	#[test]
	fn conversions() {
		assert_eq!(d("12.000").to_i64_exact(), Some(12));
		assert_eq!(d("12.5").to_i64_exact(), None);
		assert_eq!(d("1E+30").to_i64_exact(), None);
		assert_eq!(Decimal::from_f64(0.1).to_string(), "0.100000000000000");
		assert_ne!(Decimal::from_f64_exact(0.1), d("0.1"));
		assert_eq!(Decimal::from_f64_exact(2.5), d("2.5"));
		assert_eq!(d("2.5").to_f64(), 2.5);
		assert!(Decimal::from_f64(f64::NAN).is_nan());
		assert_eq!(d("100").log10(), d("2"));
		assert_eq!(d("1E+40").sqrt(), d("1E+20"));
	}
}
