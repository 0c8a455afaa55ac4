use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use anyhow::{Result, bail, ensure};
use serde_json::{Map, Value as Json, json};

use super::{DepsState, DocumentSource, Upstream};
use crate::cnf::MAX_BUFFERED_DOCUMENTS;
use crate::compiler::ExpressionProgram;
use crate::err::Error;
use crate::expr::{Dependencies, ExprKind, Expression, parse_expression};
use crate::pipeline::document::Document;
use crate::sbe::vm::{agg, arith};
use crate::val::{Object, Value, hash_value, three_way};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Accumulator {
	Sum,
	Avg,
	Min,
	Max,
	First,
	Last,
	Push,
	AddToSet,
	Count,
}

impl Accumulator {
	fn from_name(name: &str) -> Option<Self> {
		Some(match name {
			"$sum" => Self::Sum,
			"$avg" => Self::Avg,
			"$min" => Self::Min,
			"$max" => Self::Max,
			"$first" => Self::First,
			"$last" => Self::Last,
			"$push" => Self::Push,
			"$addToSet" => Self::AddToSet,
			"$count" => Self::Count,
			_ => return None,
		})
	}

	pub fn name(self) -> &'static str {
		match self {
			Self::Sum => "$sum",
			Self::Avg => "$avg",
			Self::Min => "$min",
			Self::Max => "$max",
			Self::First => "$first",
			Self::Last => "$last",
			Self::Push => "$push",
			Self::AddToSet => "$addToSet",
			Self::Count => "$count",
		}
	}
}

/// One output field of a `$group` and the expression feeding it
struct AccumulatedField {
	field: String,
	op: Accumulator,
	expr: Expression,
	program: ExpressionProgram,
}

impl fmt::Debug for AccumulatedField {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {{{}: {}}}", self.field, self.op.name(), self.expr)
	}
}

#[derive(Clone, Debug, Default)]
struct AccState {
	value: Value,
	count: u64,
}

impl AccState {
	fn accumulate(&mut self, op: Accumulator, input: Value) -> Result<()> {
		let acc = std::mem::take(&mut self.value);
		self.value = match op {
			Accumulator::Sum | Accumulator::Count => agg::sum(acc, &input)?,
			Accumulator::Avg if input.tag().is_number() => {
				self.count += 1;
				agg::sum(acc, &input)?
			}
			Accumulator::Avg => acc,
			Accumulator::Min => agg::min(acc, input, None),
			Accumulator::Max => agg::max(acc, input, None),
			Accumulator::First => agg::first(acc, input),
			Accumulator::Last => agg::last(acc, input),
			Accumulator::Push => agg::add_to_array(acc, input),
			Accumulator::AddToSet => agg::add_to_set(acc, input, None),
		};
		Ok(())
	}

	fn finalize(self, op: Accumulator) -> Result<Value> {
		Ok(match (op, self.value) {
			(Accumulator::Sum | Accumulator::Count, Value::Nothing) => Value::NumberInt32(0),
			(Accumulator::Avg, _) if self.count == 0 => Value::Null,
			(Accumulator::Avg, sum) => arith::div(&sum, &Value::NumberInt64(self.count as i64))?,
			(Accumulator::Push | Accumulator::AddToSet, Value::Nothing) => Value::new_array(),
			(_, Value::Nothing) => Value::Null,
			(_, value) => value,
		})
	}
}

fn group_key(value: Value) -> Value {
	match value {
		Value::Nothing => Value::Null,
		value => value,
	}
}

/// `$group`. Groups are emitted in the order their first document arrived.
#[derive(Debug)]
pub struct GroupStage {
	spec: Json,
	id: Expression,
	id_program: ExpressionProgram,
	fields: Vec<AccumulatedField>,
	output: Option<std::vec::IntoIter<Document>>,
}

impl GroupStage {
	pub fn parse(spec: &Json) -> Result<Self> {
		let Json::Object(map) = spec else {
			bail!(Error::fail(15947, "a group's fields must be specified in an object"));
		};
		let Some(id) = map.get("_id") else {
			bail!(Error::fail(15955, "a group specification must include an _id"));
		};
		let id = parse_expression(id)?;
		let mut fields = Vec::new();
		for (name, body) in map.iter().filter(|(k, _)| k.as_str() != "_id") {
			ensure!(
				!name.contains('.'),
				Error::fail(40235, format!("The field name '{name}' cannot contain '.'"))
			);
			let Json::Object(acc) = body else {
				bail!(Error::fail(40234, format!("The field '{name}' must be an accumulator object")));
			};
			let mut ops = acc.iter();
			let (Some((op_name, arg)), None) = (ops.next(), ops.next()) else {
				bail!(Error::fail(40238, format!("The field '{name}' must specify one accumulator")));
			};
			let Some(op) = Accumulator::from_name(op_name) else {
				bail!(Error::fail(15952, format!("unknown group operator '{op_name}'")));
			};
			let expr = match op {
				Accumulator::Count => {
					ensure!(
						arg.as_object().is_some_and(Map::is_empty),
						Error::fail(40237, "$count takes no arguments, i.e. $count:{}")
					);
					Expression::constant(1)
				}
				_ => parse_expression(arg)?,
			};
			fields.push(AccumulatedField {
				field: name.clone(),
				op,
				program: ExpressionProgram::compile(&expr, None)?,
				expr,
			});
		}
		Ok(Self {
			spec: spec.clone(),
			id_program: ExpressionProgram::compile(&id, None)?,
			id,
			fields,
			output: None,
		})
	}

	/// Rewrites the group as a transformation of the first document of each group, which is
	/// possible when the key is a single field path and every accumulator is `$first`
	pub fn rewrite_as_transform_on_first_document(&self) -> Option<GroupFromFirstDocument> {
		let ExprKind::FieldPath(path) = &self.id.kind else {
			return None;
		};
		if !path.is_document_rooted() || path.fields.is_empty() {
			return None;
		}
		if self.fields.iter().any(|f| f.op != Accumulator::First) {
			return None;
		}
		Some(GroupFromFirstDocument {
			id_field: path.dotted(),
			fields: self.fields.iter().map(|f| (f.field.clone(), f.expr.clone())).collect(),
		})
	}

	fn group_input(&mut self, input: &mut Upstream<'_>) -> Result<Vec<Document>> {
		let mut index: HashMap<u64, Vec<usize>, ahash::RandomState> = HashMap::default();
		let mut groups: Vec<(Value, Vec<AccState>)> = Vec::new();
		while let Some(doc) = input.next()? {
			let key = group_key(self.id_program.eval(doc.value.clone())?);
			let bucket = index.entry(hash_value(&key, None)).or_default();
			let found = bucket.iter().copied().find(|&i| three_way(&groups[i].0, &key, None) == Some(Ordering::Equal));
			let slot = match found {
				Some(i) => i,
				None => {
					uassert!(
						groups.len() < *MAX_BUFFERED_DOCUMENTS,
						16945,
						"Exceeded the limit of {} groups for $group",
						*MAX_BUFFERED_DOCUMENTS
					);
					bucket.push(groups.len());
					groups.push((key, vec![AccState::default(); self.fields.len()]));
					groups.len() - 1
				}
			};
			for (field, state) in self.fields.iter_mut().zip(groups[slot].1.iter_mut()) {
				let input = field.program.eval(doc.value.clone())?;
				state.accumulate(field.op, input)?;
			}
		}
		let mut out = Vec::with_capacity(groups.len());
		for (key, states) in groups {
			let mut obj = Object::with_capacity(states.len() + 1);
			obj.push("_id", key);
			for (field, state) in self.fields.iter().zip(states) {
				obj.push(field.field.as_str(), state.finalize(field.op)?);
			}
			out.push(Document::new(Value::Object(Box::new(obj))));
		}
		Ok(out)
	}
}

impl DocumentSource for GroupStage {
	fn name(&self) -> &'static str {
		"$group"
	}

	fn get_dependencies(&self, deps: &mut Dependencies) -> DepsState {
		self.id.add_dependencies(deps);
		for field in &self.fields {
			field.expr.add_dependencies(deps);
		}
		DepsState::ExhaustiveFields
	}

	fn get_next(&mut self, input: &mut Upstream<'_>) -> Result<Option<Document>> {
		if self.output.is_none() {
			let groups = self.group_input(input)?;
			trace!(target: "sbe::pipeline", groups = groups.len(), "grouped the input of $group");
			self.output = Some(groups.into_iter());
		}
		Ok(self.output.as_mut().and_then(Iterator::next))
	}

	fn serialize(&self) -> Json {
		json!({"$group": self.spec})
	}
}

/// A `$group` over a single field whose accumulators only need the first document of a group
#[derive(Clone, Debug)]
pub struct GroupFromFirstDocument {
	pub id_field: String,
	pub fields: Vec<(String, Expression)>,
}

/// `$groupByDistinctScan`: produces one group per document of a distinct scan
pub struct GroupByDistinctScanStage {
	transform: GroupFromFirstDocument,
	programs: Vec<ExpressionProgram>,
}

impl fmt::Debug for GroupByDistinctScanStage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("GroupByDistinctScanStage").field("transform", &self.transform).finish()
	}
}

impl GroupByDistinctScanStage {
	pub fn new(transform: GroupFromFirstDocument) -> Result<Self> {
		let programs = transform
			.fields
			.iter()
			.map(|(_, expr)| ExpressionProgram::compile(expr, None))
			.collect::<Result<_>>()?;
		Ok(Self {
			transform,
			programs,
		})
	}
}

impl DocumentSource for GroupByDistinctScanStage {
	fn name(&self) -> &'static str {
		"$groupByDistinctScan"
	}

	fn get_dependencies(&self, deps: &mut Dependencies) -> DepsState {
		deps.add_field(self.transform.id_field.as_str());
		for (_, expr) in &self.transform.fields {
			expr.add_dependencies(deps);
		}
		DepsState::ExhaustiveFields
	}

	fn get_next(&mut self, input: &mut Upstream<'_>) -> Result<Option<Document>> {
		let Some(doc) = input.next()? else {
			return Ok(None);
		};
		let mut obj = Object::with_capacity(self.programs.len() + 1);
		obj.push("_id", group_key(doc.value.get_path(&self.transform.id_field)));
		for ((field, _), program) in self.transform.fields.iter().zip(&mut self.programs) {
			obj.push(field.as_str(), group_key(program.eval(doc.value.clone())?));
		}
		Ok(Some(Document::new(Value::Object(Box::new(obj)))))
	}

	fn serialize(&self) -> Json {
		let mut map = Map::new();
		map.insert("_id".to_owned(), Json::from(format!("${}", self.transform.id_field)));
		for (field, expr) in &self.transform.fields {
			map.insert(field.clone(), Json::from(expr.to_string()));
		}
		json!({"$groupByDistinctScan": {"newRoot": map}})
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;
	use serde_json::json;

	use super::*;
	use crate::err::code_of;
	use crate::pipeline::stages::{Stage, run_stages};

	fn group(spec: Json) -> Stage {
		Stage::Group(GroupStage::parse(&spec).unwrap())
	}

	fn docs() -> Json {
		json!([
			{"_id": 1, "k": "a", "v": 1},
			{"_id": 2, "k": "b", "v": 2.5},
			{"_id": 3, "k": "a", "v": 3},
			{"_id": 4, "v": "x"},
		])
	}

	#[test]
	fn accumulators_in_first_seen_order() {
		let stage = group(json!({
			"_id": "$k",
			"sum": {"$sum": "$v"},
			"avg": {"$avg": "$v"},
			"min": {"$min": "$v"},
			"max": {"$max": "$v"},
			"first": {"$first": "$_id"},
			"last": {"$last": "$_id"},
			"all": {"$push": "$v"},
			"n": {"$count": {}},
		}));
		let out = run_stages(vec![stage], docs());
		assert_eq!(out.len(), 3);
		assert_eq!(
			out[0],
			json!({"_id": "a", "sum": 4, "avg": 2.0, "min": 1, "max": 3, "first": 1, "last": 3, "all": [1, 3], "n": 2})
		);
		assert_eq!(out[2]["_id"], Json::Null);
		assert_eq!(out[2]["avg"], Json::Null);
		assert_eq!(out[2]["sum"], json!(0));
	}

	#[test]
	fn numerically_equal_keys_share_a_group() {
		let docs = json!([{"k": 1}, {"k": 1.0}, {"k": {"$numberLong": "1"}}]);
		let out = run_stages(vec![group(json!({"_id": "$k", "n": {"$sum": 1}}))], docs);
		assert_eq!(out.len(), 1);
		assert_eq!(out[0]["n"], json!(3));
	}

	#[test]
	fn add_to_set_deduplicates() {
		let docs = json!([{"v": 1}, {"v": 1}, {"v": 2}]);
		let out = run_stages(vec![group(json!({"_id": null, "s": {"$addToSet": "$v"}}))], docs);
		let mut set: Vec<i64> = out[0]["s"].as_array().unwrap().iter().filter_map(Json::as_i64).collect();
		set.sort();
		assert_eq!(set, vec![1, 2]);
	}

	#[rstest]
	#[case::first_only(json!({"_id": "$k", "f": {"$first": "$v"}}), true)]
	#[case::no_accumulators(json!({"_id": "$k"}), true)]
	#[case::other_accumulator(json!({"_id": "$k", "f": {"$last": "$v"}}), false)]
	#[case::compound_key(json!({"_id": {"k": "$k"}, "f": {"$first": "$v"}}), false)]
	#[case::root_key(json!({"_id": "$$ROOT"}), false)]
	fn first_document_rewrite(#[case] spec: Json, #[case] eligible: bool) {
		let stage = GroupStage::parse(&spec).unwrap();
		assert_eq!(stage.rewrite_as_transform_on_first_document().is_some(), eligible);
	}

	#[test]
	fn distinct_scan_transform() {
		let stage = GroupStage::parse(&json!({"_id": "$k", "f": {"$first": "$v"}})).unwrap();
		let transform = stage.rewrite_as_transform_on_first_document().unwrap();
		let stage = Stage::GroupByDistinctScan(GroupByDistinctScanStage::new(transform).unwrap());
		let out = run_stages(vec![stage], json!([{"k": "a", "v": 1}, {"v": 2}]));
		assert_eq!(out, vec![json!({"_id": "a", "f": 1}), json!({"_id": null, "f": 2})]);
	}

	#[rstest]
	#[case::missing_id(json!({"n": {"$sum": 1}}), 15955)]
	#[case::unknown_accumulator(json!({"_id": null, "n": {"$median": 1}}), 15952)]
	#[case::dotted_field(json!({"_id": null, "a.b": {"$sum": 1}}), 40235)]
	#[case::count_with_argument(json!({"_id": null, "n": {"$count": 1}}), 40237)]
	fn invalid_groups(#[case] spec: Json, #[case] code: i32) {
		assert_eq!(code_of(&GroupStage::parse(&spec).unwrap_err()), Some(code));
	}
}
