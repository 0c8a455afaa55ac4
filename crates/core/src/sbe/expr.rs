//! Scalar expressions evaluated over slots.

use std::fmt::{self, Display, Formatter};

use super::{FrameId, SlotId};
use crate::val::{TypeTags, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EPrimBinaryOp {
	LogicAnd,
	LogicOr,
	Add,
	Sub,
	Mul,
	Div,
	Less,
	LessEq,
	Greater,
	GreaterEq,
	Eq,
	Neq,
	Cmp3w,
}

impl EPrimBinaryOp {
	pub fn symbol(self) -> &'static str {
		match self {
			EPrimBinaryOp::LogicAnd => "&&",
			EPrimBinaryOp::LogicOr => "||",
			EPrimBinaryOp::Add => "+",
			EPrimBinaryOp::Sub => "-",
			EPrimBinaryOp::Mul => "*",
			EPrimBinaryOp::Div => "/",
			EPrimBinaryOp::Less => "<",
			EPrimBinaryOp::LessEq => "<=",
			EPrimBinaryOp::Greater => ">",
			EPrimBinaryOp::GreaterEq => ">=",
			EPrimBinaryOp::Eq => "==",
			EPrimBinaryOp::Neq => "!=",
			EPrimBinaryOp::Cmp3w => "<=>",
		}
	}

	/// Whether this operator orders its operands and so may take a collator
	pub fn is_comparison(self) -> bool {
		matches!(
			self,
			EPrimBinaryOp::Less
				| EPrimBinaryOp::LessEq
				| EPrimBinaryOp::Greater
				| EPrimBinaryOp::GreaterEq
				| EPrimBinaryOp::Eq
				| EPrimBinaryOp::Neq
				| EPrimBinaryOp::Cmp3w
		)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EPrimUnaryOp {
	LogicNot,
	Negate,
}

/// A scalar expression.
#[derive(Clone, Debug)]
pub enum EExpression {
	Constant(Value),
	/// Reads a slot
	Variable(SlotId),
	/// Reads a value bound by an enclosing [`EExpression::LocalBind`]
	LocalVariable {
		frame: FrameId,
		idx: usize,
	},
	/// Evaluates each bind once, then the body with the binds in scope
	LocalBind {
		frame: FrameId,
		binds: Vec<EExpression>,
		body: Box<EExpression>,
	},
	PrimBinary {
		op: EPrimBinaryOp,
		lhs: Box<EExpression>,
		rhs: Box<EExpression>,
		collator: Option<Box<EExpression>>,
	},
	PrimUnary {
		op: EPrimUnaryOp,
		operand: Box<EExpression>,
	},
	Function {
		name: String,
		args: Vec<EExpression>,
	},
	If {
		cond: Box<EExpression>,
		then: Box<EExpression>,
		otherwise: Box<EExpression>,
	},
	/// Raises a user-facing error when evaluated
	Fail {
		code: i32,
		message: String,
	},
	NumConvert {
		operand: Box<EExpression>,
		target: TypeTags,
	},
	/// Whether the operand's type is in the mask. `Nothing` stays `Nothing`.
	TypeMatch {
		operand: Box<EExpression>,
		mask: u32,
	},
}

impl EExpression {
	pub fn constant(value: impl Into<Value>) -> Self {
		EExpression::Constant(value.into())
	}

	pub fn nothing() -> Self {
		EExpression::Constant(Value::Nothing)
	}

	pub fn null() -> Self {
		EExpression::Constant(Value::Null)
	}

	pub fn string(s: &str) -> Self {
		EExpression::Constant(Value::new_string(s))
	}

	pub fn var(slot: SlotId) -> Self {
		EExpression::Variable(slot)
	}

	pub fn local(frame: FrameId, idx: usize) -> Self {
		EExpression::LocalVariable {
			frame,
			idx,
		}
	}

	pub fn local_bind(frame: FrameId, binds: Vec<EExpression>, body: EExpression) -> Self {
		EExpression::LocalBind {
			frame,
			binds,
			body: Box::new(body),
		}
	}

	pub fn binary(op: EPrimBinaryOp, lhs: EExpression, rhs: EExpression) -> Self {
		EExpression::PrimBinary {
			op,
			lhs: Box::new(lhs),
			rhs: Box::new(rhs),
			collator: None,
		}
	}

	/// A comparison which orders strings under the collator held by `collator`, if any
	pub fn collated(
		op: EPrimBinaryOp,
		lhs: EExpression,
		rhs: EExpression,
		collator: Option<SlotId>,
	) -> Self {
		EExpression::PrimBinary {
			op,
			lhs: Box::new(lhs),
			rhs: Box::new(rhs),
			collator: collator.map(|slot| Box::new(EExpression::Variable(slot))),
		}
	}

	pub fn and(lhs: EExpression, rhs: EExpression) -> Self {
		Self::binary(EPrimBinaryOp::LogicAnd, lhs, rhs)
	}

	pub fn or(lhs: EExpression, rhs: EExpression) -> Self {
		Self::binary(EPrimBinaryOp::LogicOr, lhs, rhs)
	}

	pub fn not(operand: EExpression) -> Self {
		EExpression::PrimUnary {
			op: EPrimUnaryOp::LogicNot,
			operand: Box::new(operand),
		}
	}

	pub fn negate(operand: EExpression) -> Self {
		EExpression::PrimUnary {
			op: EPrimUnaryOp::Negate,
			operand: Box::new(operand),
		}
	}

	pub fn func(name: &str, args: Vec<EExpression>) -> Self {
		EExpression::Function {
			name: name.to_owned(),
			args,
		}
	}

	pub fn if_then_else(cond: EExpression, then: EExpression, otherwise: EExpression) -> Self {
		EExpression::If {
			cond: Box::new(cond),
			then: Box::new(then),
			otherwise: Box::new(otherwise),
		}
	}

	pub fn fail(code: i32, message: impl Into<String>) -> Self {
		EExpression::Fail {
			code,
			message: message.into(),
		}
	}

	pub fn num_convert(operand: EExpression, target: TypeTags) -> Self {
		EExpression::NumConvert {
			operand: Box::new(operand),
			target,
		}
	}

	pub fn type_match(operand: EExpression, mask: u32) -> Self {
		EExpression::TypeMatch {
			operand: Box::new(operand),
			mask,
		}
	}

	pub fn fill_empty(lhs: EExpression, rhs: EExpression) -> Self {
		Self::func("fillEmpty", vec![lhs, rhs])
	}

	pub fn as_constant(&self) -> Option<&Value> {
		match self {
			EExpression::Constant(v) => Some(v),
			_ => None,
		}
	}

	/// Visits this expression and every expression nested within it
	pub fn walk(&self, f: &mut impl FnMut(&EExpression)) {
		f(self);
		match self {
			EExpression::Constant(_)
			| EExpression::Variable(_)
			| EExpression::LocalVariable {
				..
			}
			| EExpression::Fail {
				..
			} => {}
			EExpression::LocalBind {
				binds,
				body,
				..
			} => {
				binds.iter().for_each(|b| b.walk(f));
				body.walk(f);
			}
			EExpression::PrimBinary {
				lhs,
				rhs,
				collator,
				..
			} => {
				lhs.walk(f);
				rhs.walk(f);
				if let Some(c) = collator {
					c.walk(f);
				}
			}
			EExpression::PrimUnary {
				operand,
				..
			}
			| EExpression::NumConvert {
				operand,
				..
			}
			| EExpression::TypeMatch {
				operand,
				..
			} => operand.walk(f),
			EExpression::Function {
				args,
				..
			} => args.iter().for_each(|a| a.walk(f)),
			EExpression::If {
				cond,
				then,
				otherwise,
			} => {
				cond.walk(f);
				then.walk(f);
				otherwise.walk(f);
			}
		}
	}
}

fn write_list(f: &mut Formatter, items: &[EExpression]) -> fmt::Result {
	for (i, item) in items.iter().enumerate() {
		if i > 0 {
			f.write_str(", ")?;
		}
		write!(f, "{item}")?;
	}
	Ok(())
}

impl Display for EExpression {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		match self {
			EExpression::Constant(v) => match v {
				Value::NumberInt64(i) => write!(f, "{i}L"),
				_ => write!(f, "{v}"),
			},
			EExpression::Variable(slot) => write!(f, "s{slot}"),
			EExpression::LocalVariable {
				frame,
				idx,
			} => write!(f, "l{frame}.{idx}"),
			EExpression::LocalBind {
				frame,
				binds,
				body,
			} => {
				f.write_str("let [")?;
				for (i, bind) in binds.iter().enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					}
					write!(f, "l{frame}.{i} = {bind}")?;
				}
				write!(f, "] {body}")
			}
			EExpression::PrimBinary {
				op,
				lhs,
				rhs,
				collator,
			} => match collator {
				Some(c) => write!(f, "({lhs} {} {rhs}, {c})", op.symbol()),
				None => write!(f, "({lhs} {} {rhs})", op.symbol()),
			},
			EExpression::PrimUnary {
				op,
				operand,
			} => match op {
				EPrimUnaryOp::LogicNot => write!(f, "!({operand})"),
				EPrimUnaryOp::Negate => write!(f, "-({operand})"),
			},
			EExpression::Function {
				name,
				args,
			} => {
				write!(f, "{name}(")?;
				write_list(f, args)?;
				f.write_str(")")
			}
			EExpression::If {
				cond,
				then,
				otherwise,
			} => write!(f, "if ({cond}, {then}, {otherwise})"),
			EExpression::Fail {
				code,
				message,
			} => write!(f, "fail({code}, \"{message}\")"),
			EExpression::NumConvert {
				operand,
				target,
			} => write!(f, "convert ({operand}, {target})"),
			EExpression::TypeMatch {
				operand,
				mask,
			} => write!(f, "typeMatch({operand}, {mask:#x})"),
		}
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case::slot(EExpression::var(4), "s4")]
	#[case::long(EExpression::constant(0i64), "0L")]
	#[case::binary(
		EExpression::binary(EPrimBinaryOp::Add, EExpression::var(1), EExpression::constant(2)),
		"(s1 + 2)"
	)]
	#[case::function(
		EExpression::func("exists", vec![EExpression::local(2, 0)]),
		"exists(l2.0)"
	)]
	#[case::fail(EExpression::fail(7, "boom"), "fail(7, \"boom\")")]
	#[case::bind(
		EExpression::local_bind(
			3,
			vec![EExpression::var(1)],
			EExpression::not(EExpression::local(3, 0))
		),
		"let [l3.0 = s1] !(l3.0)"
	)]
	fn renders_textual_syntax(#[case] expr: EExpression, #[case] expected: &str) {
		assert_eq!(expr.to_string(), expected);
	}

	#[test]
	fn walk_reaches_nested_nodes() {
		let expr = EExpression::if_then_else(
			EExpression::var(1),
			EExpression::func("f", vec![EExpression::var(2)]),
			EExpression::collated(
				EPrimBinaryOp::Eq,
				EExpression::var(3),
				EExpression::null(),
				Some(9),
			),
		);
		let mut slots = Vec::new();
		expr.walk(&mut |e| {
			if let EExpression::Variable(s) = e {
				slots.push(*s);
			}
		});
		assert_eq!(slots, vec![1, 2, 3, 9]);
	}
}
