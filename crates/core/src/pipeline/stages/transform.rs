use anyhow::{Result, bail, ensure};
use serde_json::{Map, Value as Json, json};

use super::{DepsState, DocumentSource, StageConstraints, Upstream};
use crate::err::Error;
use crate::expr::{Dependencies, parse_expression};
use crate::pipeline::document::{Document, set_path, to_object};
use crate::pipeline::projection::{ComputedField, Projection};
use crate::val::Value;

/// `$project`
#[derive(Debug)]
pub struct ProjectStage {
	projection: Projection,
}

impl ProjectStage {
	pub fn parse(spec: &Json) -> Result<Self> {
		Ok(Self {
			projection: Projection::parse(spec)?,
		})
	}

	pub fn projection(&self) -> &Projection {
		&self.projection
	}

	pub fn into_projection(self) -> Projection {
		self.projection
	}
}

impl DocumentSource for ProjectStage {
	fn name(&self) -> &'static str {
		"$project"
	}

	fn constraints(&self) -> StageConstraints {
		StageConstraints {
			can_swap_with_skip_limit: true,
			..Default::default()
		}
	}

	fn get_dependencies(&self, deps: &mut Dependencies) -> DepsState {
		match self.projection.add_dependencies(deps) {
			true => DepsState::ExhaustiveFields,
			false => DepsState::SeeNext,
		}
	}

	fn get_next(&mut self, input: &mut Upstream<'_>) -> Result<Option<Document>> {
		let Some(doc) = input.next()? else {
			return Ok(None);
		};
		let value = self.projection.apply(&doc.value)?;
		Ok(Some(Document::with_meta(value, doc.meta)))
	}

	fn serialize(&self) -> Json {
		json!({"$project": self.projection.serialize()})
	}
}

/// `$addFields`, also spelled `$set`
#[derive(Debug)]
pub struct AddFieldsStage {
	alias: String,
	spec: Json,
	fields: Vec<ComputedField>,
}

impl AddFieldsStage {
	pub fn parse(alias: &str, spec: &Json) -> Result<Self> {
		let Json::Object(map) = spec else {
			bail!(Error::fail(40272, format!("{alias} specification stage must be an object")));
		};
		let mut fields = Vec::new();
		collect_fields(map, "", &mut fields)?;
		Ok(Self {
			alias: alias.to_owned(),
			spec: spec.clone(),
			fields,
		})
	}
}

fn collect_fields(map: &Map<String, Json>, prefix: &str, out: &mut Vec<ComputedField>) -> Result<()> {
	for (name, value) in map {
		ensure!(!name.is_empty(), Error::fail(40352, "FieldPath cannot be constructed with empty string"));
		ensure!(!name.starts_with('$'), Error::fail(16410, "FieldPath field names may not start with '$'"));
		let path = match prefix {
			"" => name.clone(),
			prefix => format!("{prefix}.{name}"),
		};
		match value {
			Json::Object(nested) if !nested.is_empty() && !nested.keys().any(|k| k.starts_with('$')) => {
				collect_fields(nested, &path, out)?;
			}
			value => out.push(ComputedField::new(path, parse_expression(value)?)?),
		}
	}
	Ok(())
}

impl DocumentSource for AddFieldsStage {
	fn name(&self) -> &'static str {
		"$addFields"
	}

	fn constraints(&self) -> StageConstraints {
		StageConstraints {
			can_swap_with_skip_limit: true,
			..Default::default()
		}
	}

	fn get_dependencies(&self, deps: &mut Dependencies) -> DepsState {
		for field in &self.fields {
			field.expr.add_dependencies(deps);
		}
		DepsState::SeeNext
	}

	fn get_next(&mut self, input: &mut Upstream<'_>) -> Result<Option<Document>> {
		let Some(doc) = input.next()? else {
			return Ok(None);
		};
		let mut out = to_object(doc.value.clone());
		for field in &mut self.fields {
			let value = field.eval(&doc.value)?;
			set_path(&mut out, &field.path, value);
		}
		Ok(Some(Document::with_meta(Value::Object(Box::new(out)), doc.meta)))
	}

	fn serialize(&self) -> Json {
		let mut map = Map::new();
		map.insert(self.alias.clone(), self.spec.clone());
		Json::Object(map)
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::pipeline::stages::{Stage, run_stages};

	#[test]
	fn add_fields_evaluates_against_the_input() {
		let stage = Stage::AddFields(AddFieldsStage::parse("$set", &json!({"c": {"$add": ["$a", 1]}, "d.e": "$a"})).unwrap());
		assert_eq!(run_stages(vec![stage], json!([{"a": 1}])), vec![json!({"a": 1, "c": 2, "d": {"e": 1}})]);
	}

	#[test]
	fn nested_add_fields_merge_into_objects() {
		let stage = Stage::AddFields(AddFieldsStage::parse("$addFields", &json!({"d": {"f": 2}})).unwrap());
		assert_eq!(run_stages(vec![stage], json!([{"d": {"e": 1}}])), vec![json!({"d": {"e": 1, "f": 2}})]);
	}

	#[test]
	fn projections_are_exhaustive_only_when_inclusive() {
		let mut deps = Dependencies::new();
		let include = ProjectStage::parse(&json!({"a": 1})).unwrap();
		assert_eq!(include.get_dependencies(&mut deps), DepsState::ExhaustiveFields);
		let exclude = ProjectStage::parse(&json!({"a": 0})).unwrap();
		assert_eq!(exclude.get_dependencies(&mut deps), DepsState::SeeNext);
	}
}
