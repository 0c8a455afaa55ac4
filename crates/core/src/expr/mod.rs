//! The typed MQL expression tree.
//!
//! An [`Expression`] is a node kind plus its ordered children. The children of every kind are
//! laid out in a fixed order, so that a walker can visit them generically and a compiler can
//! tell them apart by position. Optional operands are present only when they were given, with
//! the node kind recording which ones are there.

mod deps;
mod parse;

use std::fmt::{self, Display, Formatter};

pub use self::deps::Dependencies;
pub use self::parse::{Parser, parse_expression};
use crate::val::Value;

/// Identifies a variable binding. Ids are assigned while parsing, so that two bindings with the
/// same name in different scopes never share one.
pub type VariableId = u64;

/// The variable a field path starts from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathRoot {
	/// `$$ROOT`: the document the expression is evaluated against
	Root,
	/// `$$CURRENT`, which is where `$field` paths start
	Current,
	/// `$$REMOVE`: always missing
	Remove,
	/// A system variable supplied by the runtime environment, such as `$$NOW`
	System(String),
	/// A variable bound by `$let` or `$filter`
	User {
		id: VariableId,
		name: String,
	},
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldPath {
	pub root: PathRoot,
	/// The fields below the root, possibly empty
	pub fields: Vec<String>,
}

impl FieldPath {
	pub fn current(fields: &[&str]) -> Self {
		Self {
			root: PathRoot::Current,
			fields: fields.iter().map(|f| f.to_string()).collect(),
		}
	}

	/// The dotted path below the root
	pub fn dotted(&self) -> String {
		self.fields.join(".")
	}

	/// Whether the path starts from the evaluated document
	pub fn is_document_rooted(&self) -> bool {
		matches!(self.root, PathRoot::Root | PathRoot::Current)
	}
}

impl Display for FieldPath {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match &self.root {
			PathRoot::Current if !self.fields.is_empty() => return write!(f, "${}", self.dotted()),
			PathRoot::Current => f.write_str("$$CURRENT")?,
			PathRoot::Root => f.write_str("$$ROOT")?,
			PathRoot::Remove => f.write_str("$$REMOVE")?,
			PathRoot::System(name) => write!(f, "$${name}")?,
			PathRoot::User {
				name,
				..
			} => write!(f, "$${name}")?,
		}
		for field in &self.fields {
			write!(f, ".{field}")?;
		}
		Ok(())
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
	Eq,
	Ne,
	Gt,
	Gte,
	Lt,
	Lte,
	Cmp,
}

impl CmpOp {
	pub fn name(self) -> &'static str {
		match self {
			CmpOp::Eq => "$eq",
			CmpOp::Ne => "$ne",
			CmpOp::Gt => "$gt",
			CmpOp::Gte => "$gte",
			CmpOp::Lt => "$lt",
			CmpOp::Lte => "$lte",
			CmpOp::Cmp => "$cmp",
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetOp {
	Union,
	Intersection,
	Difference,
}

impl SetOp {
	pub fn name(self) -> &'static str {
		match self {
			SetOp::Union => "$setUnion",
			SetOp::Intersection => "$setIntersection",
			SetOp::Difference => "$setDifference",
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatePart {
	DayOfMonth,
	DayOfWeek,
	DayOfYear,
}

impl DatePart {
	pub fn name(self) -> &'static str {
		match self {
			DatePart::DayOfMonth => "$dayOfMonth",
			DatePart::DayOfWeek => "$dayOfWeek",
			DatePart::DayOfYear => "$dayOfYear",
		}
	}

	/// The runtime builtin computing this part
	pub fn builtin(self) -> &'static str {
		match self {
			DatePart::DayOfMonth => "dayOfMonth",
			DatePart::DayOfWeek => "dayOfWeek",
			DatePart::DayOfYear => "dayOfYear",
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegexOp {
	Match,
	Find,
	FindAll,
}

impl RegexOp {
	pub fn name(self) -> &'static str {
		match self {
			RegexOp::Match => "$regexMatch",
			RegexOp::Find => "$regexFind",
			RegexOp::FindAll => "$regexFindAll",
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexUnit {
	Bytes,
	CodePoints,
}

/// Trigonometric operators, with the closed or open bounds of their domain
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrigOp {
	Sin,
	Cos,
	Tan,
	Acos,
	Asin,
	Atan,
	Acosh,
	Asinh,
	Atanh,
	Cosh,
	Sinh,
	Tanh,
	DegreesToRadians,
	RadiansToDegrees,
}

/// One end of the domain of a trigonometric operator
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Bound {
	Inclusive(f64),
	Exclusive(f64),
}

impl TrigOp {
	pub fn name(self) -> &'static str {
		match self {
			TrigOp::Sin => "$sin",
			TrigOp::Cos => "$cos",
			TrigOp::Tan => "$tan",
			TrigOp::Acos => "$acos",
			TrigOp::Asin => "$asin",
			TrigOp::Atan => "$atan",
			TrigOp::Acosh => "$acosh",
			TrigOp::Asinh => "$asinh",
			TrigOp::Atanh => "$atanh",
			TrigOp::Cosh => "$cosh",
			TrigOp::Sinh => "$sinh",
			TrigOp::Tanh => "$tanh",
			TrigOp::DegreesToRadians => "$degreesToRadians",
			TrigOp::RadiansToDegrees => "$radiansToDegrees",
		}
	}

	/// The name of the runtime builtin
	pub fn builtin(self) -> &'static str {
		&self.name()[1..]
	}

	pub fn bounds(self) -> Option<(Bound, Bound)> {
		match self {
			TrigOp::Acos | TrigOp::Asin | TrigOp::Atanh => Some((Bound::Inclusive(-1.0), Bound::Inclusive(1.0))),
			TrigOp::Acosh => Some((Bound::Inclusive(1.0), Bound::Inclusive(f64::INFINITY))),
			TrigOp::Sin | TrigOp::Cos | TrigOp::Tan => {
				Some((Bound::Exclusive(f64::NEG_INFINITY), Bound::Exclusive(f64::INFINITY)))
			}
			_ => None,
		}
	}
}

#[derive(Clone, Debug)]
pub enum ExprKind {
	Constant(Value),
	FieldPath(FieldPath),
	/// `[a, b, ...]`, one child per element
	ArrayLiteral,
	/// `{name: expr, ...}`, one child per field
	ObjectLiteral(Vec<String>),
	Abs,
	Add,
	Ceil,
	Divide,
	Exp,
	Floor,
	Ln,
	Log10,
	Mod,
	Multiply,
	Sqrt,
	ArrayElemAt,
	First,
	Last,
	ConcatArrays,
	/// Children: input, cond
	Filter {
		this: VariableId,
	},
	IsArray,
	ReverseArray,
	BsonSize,
	And,
	Or,
	Not,
	/// Children: if, then, else
	Cond,
	/// Children: case and then pairs, then the default when there is one
	Switch {
		has_default: bool,
	},
	IfNull,
	/// Children: one initializer per variable, then the body
	Let {
		vars: Vec<(VariableId, String)>,
	},
	Compare(CmpOp),
	Concat,
	/// Children: string, substring, then the optional start and end
	IndexOf {
		unit: IndexUnit,
		has_start: bool,
		has_end: bool,
	},
	/// Children: input, find, replacement
	ReplaceOne,
	Split,
	ToLower,
	ToUpper,
	IsNumber,
	/// Children: date, then the timezone when there is one
	DatePart {
		part: DatePart,
		has_timezone: bool,
	},
	/// Children: startDate, endDate, unit, then the optional timezone and startOfWeek
	DateDiff {
		has_timezone: bool,
		has_start_of_week: bool,
	},
	/// Children: startDate, unit, amount, then the timezone when there is one
	DateAdd {
		subtract: bool,
		has_timezone: bool,
	},
	/// Children: input, regex, then the options when given
	Regex {
		op: RegexOp,
		has_options: bool,
	},
	SetOp(SetOp),
	Trig(TrigOp),
	Atan2,
	/// An operator which parses but has no compiled form
	Unsupported(String),
}

impl ExprKind {
	/// The operator name as written in MQL
	pub fn name(&self) -> &str {
		match self {
			ExprKind::Constant(_) => "$const",
			ExprKind::FieldPath(_) => "$fieldPath",
			ExprKind::ArrayLiteral => "$array",
			ExprKind::ObjectLiteral(_) => "$object",
			ExprKind::Abs => "$abs",
			ExprKind::Add => "$add",
			ExprKind::Ceil => "$ceil",
			ExprKind::Divide => "$divide",
			ExprKind::Exp => "$exp",
			ExprKind::Floor => "$floor",
			ExprKind::Ln => "$ln",
			ExprKind::Log10 => "$log10",
			ExprKind::Mod => "$mod",
			ExprKind::Multiply => "$multiply",
			ExprKind::Sqrt => "$sqrt",
			ExprKind::ArrayElemAt => "$arrayElemAt",
			ExprKind::First => "$first",
			ExprKind::Last => "$last",
			ExprKind::ConcatArrays => "$concatArrays",
			ExprKind::Filter {
				..
			} => "$filter",
			ExprKind::IsArray => "$isArray",
			ExprKind::ReverseArray => "$reverseArray",
			ExprKind::BsonSize => "$bsonSize",
			ExprKind::And => "$and",
			ExprKind::Or => "$or",
			ExprKind::Not => "$not",
			ExprKind::Cond => "$cond",
			ExprKind::Switch {
				..
			} => "$switch",
			ExprKind::IfNull => "$ifNull",
			ExprKind::Let {
				..
			} => "$let",
			ExprKind::Compare(op) => op.name(),
			ExprKind::Concat => "$concat",
			ExprKind::IndexOf {
				unit: IndexUnit::Bytes,
				..
			} => "$indexOfBytes",
			ExprKind::IndexOf {
				unit: IndexUnit::CodePoints,
				..
			} => "$indexOfCP",
			ExprKind::ReplaceOne => "$replaceOne",
			ExprKind::Split => "$split",
			ExprKind::ToLower => "$toLower",
			ExprKind::ToUpper => "$toUpper",
			ExprKind::IsNumber => "$isNumber",
			ExprKind::DatePart {
				part,
				..
			} => part.name(),
			ExprKind::DateDiff {
				..
			} => "$dateDiff",
			ExprKind::DateAdd {
				subtract: false,
				..
			} => "$dateAdd",
			ExprKind::DateAdd {
				subtract: true,
				..
			} => "$dateSubtract",
			ExprKind::Regex {
				op,
				..
			} => op.name(),
			ExprKind::SetOp(op) => op.name(),
			ExprKind::Trig(op) => op.name(),
			ExprKind::Atan2 => "$atan2",
			ExprKind::Unsupported(name) => name,
		}
	}
}

#[derive(Clone, Debug)]
pub struct Expression {
	pub kind: ExprKind,
	pub children: Vec<Expression>,
}

impl Expression {
	pub fn new(kind: ExprKind, children: Vec<Expression>) -> Self {
		Self {
			kind,
			children,
		}
	}

	pub fn constant(value: impl Into<Value>) -> Self {
		Self::new(ExprKind::Constant(value.into()), vec![])
	}

	pub fn field(path: &str) -> Self {
		let fields: Vec<&str> = path.split('.').collect();
		Self::new(ExprKind::FieldPath(FieldPath::current(&fields)), vec![])
	}

	pub fn as_constant(&self) -> Option<&Value> {
		match &self.kind {
			ExprKind::Constant(v) => Some(v),
			_ => None,
		}
	}

	/// Collects the document fields this expression reads
	pub fn add_dependencies(&self, deps: &mut Dependencies) {
		if let ExprKind::FieldPath(path) = &self.kind {
			deps.add_path(path);
		}
		for child in &self.children {
			child.add_dependencies(deps);
		}
	}
}

impl Display for Expression {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match &self.kind {
			ExprKind::Constant(v) => write!(f, "{{$const: {v}}}"),
			ExprKind::FieldPath(p) => write!(f, "\"{p}\""),
			ExprKind::ObjectLiteral(names) => {
				f.write_str("{")?;
				for (i, (name, child)) in names.iter().zip(&self.children).enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					}
					write!(f, "{name}: {child}")?;
				}
				f.write_str("}")
			}
			kind => {
				if matches!(kind, ExprKind::ArrayLiteral) {
					f.write_str("[")?;
				} else {
					write!(f, "{{{}: [", kind.name())?;
				}
				for (i, child) in self.children.iter().enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					}
					write!(f, "{child}")?;
				}
				if matches!(kind, ExprKind::ArrayLiteral) {
					f.write_str("]")
				} else {
					f.write_str("]}")
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn renders_operators_and_paths() {
		let expr = Expression::new(ExprKind::Add, vec![Expression::field("a.b"), Expression::constant(1)]);
		assert_eq!(expr.to_string(), "{$add: [\"$a.b\", {$const: 1}]}");
		let root = FieldPath {
			root: PathRoot::Root,
			fields: vec!["x".into()],
		};
		assert_eq!(root.to_string(), "$$ROOT.x");
	}

	#[test]
	fn trig_builtins_drop_the_dollar() {
		assert_eq!(TrigOp::DegreesToRadians.builtin(), "degreesToRadians");
		assert!(TrigOp::Atan.bounds().is_none());
	}
}
