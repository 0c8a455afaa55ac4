use std::fmt;

use anyhow::{Result, bail, ensure};
use serde_json::{Map, Value as Json};

use super::document::{remove_path, set_path, to_object};
use crate::compiler::ExpressionProgram;
use crate::err::Error;
use crate::expr::{Dependencies, Expression, parse_expression};
use crate::val::{Array, ArrayEnumerator, Object, ObjectEnumerator, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProjectionKind {
	Inclusion,
	Exclusion,
}

/// The included fields of an inclusion projection, as a tree keyed by path component
#[derive(Debug, Default)]
struct Inclusions {
	fields: Vec<(String, Include)>,
}

#[derive(Debug)]
enum Include {
	All,
	Nested(Inclusions),
}

impl Inclusions {
	fn insert(&mut self, path: &str) {
		let (head, rest) = match path.split_once('.') {
			Some((head, rest)) => (head, Some(rest)),
			None => (path, None),
		};
		let pos = self.fields.iter().position(|(name, _)| name == head);
		match (pos, rest) {
			(Some(i), None) => self.fields[i].1 = Include::All,
			(None, None) => self.fields.push((head.to_owned(), Include::All)),
			(Some(i), Some(rest)) => {
				if let Include::Nested(child) = &mut self.fields[i].1 {
					child.insert(rest);
				}
			}
			(None, Some(rest)) => {
				let mut child = Inclusions::default();
				child.insert(rest);
				self.fields.push((head.to_owned(), Include::Nested(child)));
			}
		}
	}

	fn get(&self, name: &str) -> Option<&Include> {
		self.fields.iter().find(|(n, _)| n == name).map(|(_, i)| i)
	}

	fn apply(&self, doc: &Value) -> Object {
		let mut out = Object::new();
		let mut it = ObjectEnumerator::new(doc);
		while !it.at_end() {
			match self.get(it.field_name()) {
				Some(Include::All) => out.push(it.field_name(), it.view().clone()),
				Some(Include::Nested(child)) => {
					if let Some(value) = child.apply_nested(it.view()) {
						out.push(it.field_name(), value);
					}
				}
				None => {}
			}
			it.advance();
		}
		out
	}

	/// Projects a value found below an included prefix. Scalars are dropped, arrays are
	/// projected element by element.
	fn apply_nested(&self, value: &Value) -> Option<Value> {
		let tag = value.tag();
		if tag.is_object() {
			Some(Value::Object(Box::new(self.apply(value))))
		} else if tag.is_array() {
			let mut out = Array::new();
			let mut it = ArrayEnumerator::new(value);
			while !it.at_end() {
				if let Some(v) = self.apply_nested(it.view()) {
					out.push(v);
				}
				it.advance();
			}
			Some(Value::Array(Box::new(out)))
		} else {
			None
		}
	}
}

/// A computed field and its compiled expression
pub struct ComputedField {
	pub path: String,
	pub expr: Expression,
	program: ExpressionProgram,
}

impl fmt::Debug for ComputedField {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.path, self.expr)
	}
}

impl ComputedField {
	pub fn new(path: impl Into<String>, expr: Expression) -> Result<Self> {
		let program = ExpressionProgram::compile(&expr, None)?;
		Ok(Self {
			path: path.into(),
			expr,
			program,
		})
	}

	pub fn eval(&mut self, doc: &Value) -> Result<Value> {
		self.program.eval(doc.clone())
	}
}

/// A parsed `$project` specification
#[derive(Debug)]
pub struct Projection {
	kind: ProjectionKind,
	spec: Json,
	included: Vec<String>,
	excluded: Vec<String>,
	computed: Vec<ComputedField>,
	inclusions: Inclusions,
}

fn validate_path(path: &str) -> Result<()> {
	for part in path.split('.') {
		ensure!(!part.is_empty(), Error::fail(40352, "FieldPath cannot be constructed with empty string"));
		ensure!(
			!part.starts_with('$'),
			Error::fail(16410, "FieldPath field names may not start with '$'")
		);
	}
	Ok(())
}

/// Whether a projection value is a plain number or boolean and so includes or excludes a field
fn as_flag(value: &Json) -> Option<bool> {
	match value {
		Json::Bool(b) => Some(*b),
		Json::Number(n) => Some(n.as_f64().is_some_and(|f| f != 0.0)),
		_ => None,
	}
}

fn is_nested_spec(value: &Json) -> bool {
	match value {
		Json::Object(map) => !map.is_empty() && !map.keys().any(|k| k.starts_with('$')),
		_ => false,
	}
}

impl Projection {
	pub fn parse(spec: &Json) -> Result<Self> {
		let Json::Object(map) = spec else {
			bail!(Error::fail(15969, "$project specification must be an object"));
		};
		ensure!(!map.is_empty(), Error::fail(40177, "$project specification must have at least one field"));
		let mut proj = Self {
			kind: ProjectionKind::Inclusion,
			spec: spec.clone(),
			included: Vec::new(),
			excluded: Vec::new(),
			computed: Vec::new(),
			inclusions: Inclusions::default(),
		};
		let mut id_excluded = false;
		proj.collect(map, "", &mut id_excluded)?;
		let has_inclusions = !proj.included.is_empty() || !proj.computed.is_empty();
		let exclusions = proj.excluded.iter().filter(|p| p.as_str() != "_id").count();
		if exclusions > 0 || (!has_inclusions && id_excluded) {
			if let Some(path) = proj.included.first().or(proj.computed.first().map(|c| &c.path)) {
				bail!(Error::fail(31253, format!("Cannot do inclusion on field {path} in exclusion projection")));
			}
			proj.kind = ProjectionKind::Exclusion;
		} else {
			if !id_excluded && !proj.included.iter().any(|p| p == "_id") {
				proj.included.insert(0, "_id".to_owned());
			}
			proj.excluded.clear();
			for path in &proj.included {
				proj.inclusions.insert(path);
			}
		}
		Ok(proj)
	}

	fn collect(&mut self, map: &Map<String, Json>, prefix: &str, id_excluded: &mut bool) -> Result<()> {
		for (name, value) in map {
			let path = if prefix.is_empty() {
				name.clone()
			} else {
				format!("{prefix}.{name}")
			};
			validate_path(&path)?;
			if let Some(include) = as_flag(value) {
				match include {
					true => self.included.push(path),
					false if path == "_id" => {
						*id_excluded = true;
						self.excluded.push(path);
					}
					false => {
						if !self.included.is_empty() || !self.computed.is_empty() {
							bail!(Error::fail(31254, format!("Cannot do exclusion on field {path} in inclusion projection")));
						}
						self.excluded.push(path);
					}
				}
			} else if is_nested_spec(value) {
				if let Json::Object(nested) = value {
					self.collect(nested, &path, id_excluded)?;
				}
			} else {
				let expr = parse_expression(value)?;
				self.computed.push(ComputedField::new(path, expr)?);
			}
		}
		Ok(())
	}

	pub fn kind(&self) -> ProjectionKind {
		self.kind
	}

	pub fn is_inclusion(&self) -> bool {
		self.kind == ProjectionKind::Inclusion
	}

	pub fn has_expressions(&self) -> bool {
		!self.computed.is_empty()
	}

	pub fn serialize(&self) -> Json {
		self.spec.clone()
	}

	/// Applies the projection to one document
	pub fn apply(&mut self, doc: &Value) -> Result<Value> {
		match self.kind {
			ProjectionKind::Exclusion => {
				let mut out = to_object(doc.clone());
				for path in &self.excluded {
					remove_path(&mut out, path);
				}
				Ok(Value::Object(Box::new(out)))
			}
			ProjectionKind::Inclusion => {
				let mut out = self.inclusions.apply(doc);
				for field in &mut self.computed {
					let value = field.eval(doc)?;
					set_path(&mut out, &field.path, value);
				}
				Ok(Value::Object(Box::new(out)))
			}
		}
	}

	/// Adds the fields this projection reads. An inclusion projection determines the full set of
	/// fields which are read below it, an exclusion projection does not.
	pub fn add_dependencies(&self, deps: &mut Dependencies) -> bool {
		match self.kind {
			ProjectionKind::Exclusion => false,
			ProjectionKind::Inclusion => {
				for path in &self.included {
					deps.add_field(path.as_str());
				}
				for field in &self.computed {
					field.expr.add_dependencies(deps);
				}
				true
			}
		}
	}
}

/// Builds an inclusion projection over the given top-level paths
pub fn inclusion_of(fields: &[String]) -> Json {
	let mut map = Map::new();
	let mut has_id = false;
	for field in fields {
		has_id |= field == "_id" || field.starts_with("_id.");
		map.insert(field.clone(), Json::from(1));
	}
	if !has_id {
		map.insert("_id".to_owned(), Json::from(0));
	}
	Json::Object(map)
}

#[cfg(test)]
mod tests {
	use rstest::rstest;
	use serde_json::json;

	use super::*;
	use crate::err::code_of;
	use crate::val::json::{from_json, to_json};

	fn project(spec: Json, doc: Json) -> Json {
		let mut proj = Projection::parse(&spec).unwrap();
		to_json(&proj.apply(&from_json(&doc).unwrap()).unwrap()).unwrap()
	}

	#[rstest]
	#[case::inclusion_keeps_id(json!({"b": 1}), json!({"_id": 1, "a": 1, "b": 2}), json!({"_id": 1, "b": 2}))]
	#[case::inclusion_follows_document_order(json!({"b": 1, "a": 1, "_id": 0}), json!({"a": 1, "b": 2}), json!({"a": 1, "b": 2}))]
	#[case::nested_inclusion(json!({"a.b": 1, "_id": 0}), json!({"a": [{"b": 1, "c": 2}, 3]}), json!({"a": [{"b": 1}]}))]
	#[case::computed(json!({"s": {"$add": ["$a", 1]}, "_id": 0}), json!({"a": 1}), json!({"s": 2}))]
	#[case::exclusion(json!({"a": 0}), json!({"_id": 1, "a": 1, "b": 2}), json!({"_id": 1, "b": 2}))]
	#[case::id_only_exclusion(json!({"_id": 0}), json!({"_id": 1, "a": 1}), json!({"a": 1}))]
	fn projection_shapes(#[case] spec: Json, #[case] doc: Json, #[case] expected: Json) {
		assert_eq!(project(spec, doc), expected);
	}

	#[rstest]
	#[case::mixed_exclusion(json!({"a": 1, "b": 0}), 31254)]
	#[case::mixed_inclusion(json!({"b": 0, "a": 1}), 31253)]
	#[case::empty(json!({}), 40177)]
	#[case::dollar_field(json!({"$a": 1}), 16410)]
	fn invalid_projections(#[case] spec: Json, #[case] code: i32) {
		let err = Projection::parse(&spec).unwrap_err();
		assert_eq!(code_of(&err), Some(code));
	}

	#[test]
	fn dependency_projection_hides_id() {
		assert_eq!(inclusion_of(&["a".to_owned()]), json!({"a": 1, "_id": 0}));
		assert_eq!(inclusion_of(&["_id".to_owned()]), json!({"_id": 1}));
	}
}
