use std::collections::VecDeque;

use anyhow::{Result, bail, ensure};
use serde_json::{Map, Value as Json};

use super::{DepsState, DocumentSource, Upstream};
use crate::err::Error;
use crate::expr::Dependencies;
use crate::pipeline::document::{Document, remove_path, set_path, to_object};
use crate::val::{ArrayEnumerator, Object, Value};

/// `$unwind`
#[derive(Debug)]
pub struct UnwindStage {
	path: String,
	include_array_index: Option<String>,
	preserve_null_and_empty_arrays: bool,
	pending: VecDeque<Document>,
}

fn field_path(value: &Json, code: i32, what: &str) -> Result<String> {
	let Some(path) = value.as_str() else {
		bail!(Error::fail(code, format!("{what} to $unwind stage should be a string")));
	};
	let Some(path) = path.strip_prefix('$') else {
		bail!(Error::fail(28818, format!("{what} to $unwind stage should be prefixed with a '$': {path}")));
	};
	ensure!(!path.is_empty(), Error::fail(40352, "FieldPath cannot be constructed with empty string"));
	Ok(path.to_owned())
}

impl UnwindStage {
	pub fn parse(spec: &Json) -> Result<Self> {
		let mut stage = Self {
			path: String::new(),
			include_array_index: None,
			preserve_null_and_empty_arrays: false,
			pending: VecDeque::new(),
		};
		match spec {
			Json::String(_) => stage.path = field_path(spec, 15981, "path option")?,
			Json::Object(map) => stage.parse_options(map)?,
			_ => bail!(Error::fail(15981, "expected either a string or an object as specification for $unwind stage")),
		}
		Ok(stage)
	}

	fn parse_options(&mut self, map: &Map<String, Json>) -> Result<()> {
		for (name, value) in map {
			match name.as_str() {
				"path" => self.path = field_path(value, 28808, "path option")?,
				"includeArrayIndex" => {
					let Some(index) = value.as_str() else {
						bail!(Error::fail(28810, "includeArrayIndex option to $unwind stage should be a string"));
					};
					ensure!(
						!index.is_empty() && !index.starts_with('$'),
						Error::fail(28822, format!("includeArrayIndex option to $unwind stage should not be prefixed with a '$': {index}"))
					);
					self.include_array_index = Some(index.to_owned());
				}
				"preserveNullAndEmptyArrays" => {
					let Some(preserve) = value.as_bool() else {
						bail!(Error::fail(28809, "expected a boolean for the preserveNullAndEmptyArrays option to $unwind stage"));
					};
					self.preserve_null_and_empty_arrays = preserve;
				}
				other => bail!(Error::fail(28811, format!("unrecognized option to $unwind stage: {other}"))),
			}
		}
		ensure!(!self.path.is_empty(), Error::fail(28812, "no path specified to $unwind stage"));
		Ok(())
	}

	fn with_index(&self, mut obj: Object, index: Value) -> Value {
		if let Some(field) = &self.include_array_index {
			set_path(&mut obj, field, index);
		}
		Value::Object(Box::new(obj))
	}

	fn unwind(&mut self, doc: Document) {
		let value = doc.value.get_path(&self.path);
		if value.tag().is_array() {
			let mut it = ArrayEnumerator::new(&value);
			let mut index = 0i64;
			while !it.at_end() {
				let mut obj = to_object(doc.value.clone());
				set_path(&mut obj, &self.path, it.view().clone());
				let out = self.with_index(obj, Value::NumberInt64(index));
				self.pending.push_back(Document::with_meta(out, doc.meta.clone()));
				index += 1;
				it.advance();
			}
			if index == 0 && self.preserve_null_and_empty_arrays {
				let mut obj = to_object(doc.value);
				remove_path(&mut obj, &self.path);
				let out = self.with_index(obj, Value::Null);
				self.pending.push_back(Document::with_meta(out, doc.meta));
			}
		} else if !value.is_null_or_missing() {
			let out = self.with_index(to_object(doc.value), Value::Null);
			self.pending.push_back(Document::with_meta(out, doc.meta));
		} else if self.preserve_null_and_empty_arrays {
			let out = self.with_index(to_object(doc.value), Value::Null);
			self.pending.push_back(Document::with_meta(out, doc.meta));
		}
	}
}

impl DocumentSource for UnwindStage {
	fn name(&self) -> &'static str {
		"$unwind"
	}

	fn get_dependencies(&self, deps: &mut Dependencies) -> DepsState {
		deps.add_field(self.path.as_str());
		DepsState::SeeNext
	}

	fn get_next(&mut self, input: &mut Upstream<'_>) -> Result<Option<Document>> {
		loop {
			if let Some(doc) = self.pending.pop_front() {
				return Ok(Some(doc));
			}
			let Some(doc) = input.next()? else {
				return Ok(None);
			};
			self.unwind(doc);
		}
	}

	fn serialize(&self) -> Json {
		let mut spec = Map::new();
		spec.insert("path".to_owned(), Json::from(format!("${}", self.path)));
		if let Some(index) = &self.include_array_index {
			spec.insert("includeArrayIndex".to_owned(), Json::from(index.as_str()));
		}
		if self.preserve_null_and_empty_arrays {
			spec.insert("preserveNullAndEmptyArrays".to_owned(), Json::Bool(true));
		}
		let mut map = Map::new();
		map.insert("$unwind".to_owned(), Json::Object(spec));
		Json::Object(map)
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;
	use serde_json::json;

	use super::*;
	use crate::err::code_of;
	use crate::pipeline::stages::{Stage, run_stages};

	fn unwind(spec: Json, docs: Json) -> Vec<Json> {
		run_stages(vec![Stage::Unwind(UnwindStage::parse(&spec).unwrap())], docs)
	}

	#[test]
	fn one_document_per_element() {
		let out = unwind(json!("$a"), json!([{"_id": 1, "a": [1, 2]}, {"_id": 2, "a": []}, {"_id": 3, "a": 5}, {"_id": 4}]));
		assert_eq!(out, vec![json!({"_id": 1, "a": 1}), json!({"_id": 1, "a": 2}), json!({"_id": 3, "a": 5})]);
	}

	#[test]
	fn preserving_with_an_index() {
		let spec = json!({"path": "$a.b", "includeArrayIndex": "i", "preserveNullAndEmptyArrays": true});
		let out = unwind(spec, json!([{"a": {"b": ["x"]}}, {"a": {"b": []}}, {"a": null}]));
		assert_eq!(
			out,
			vec![json!({"a": {"b": "x"}, "i": 0}), json!({"a": {}, "i": null}), json!({"a": null, "i": null})]
		);
	}

	#[rstest]
	#[case::not_prefixed(json!("a"), 28818)]
	#[case::no_path(json!({"preserveNullAndEmptyArrays": true}), 28812)]
	#[case::unknown_option(json!({"path": "$a", "other": 1}), 28811)]
	#[case::number(json!(1), 15981)]
	fn invalid_specs(#[case] spec: Json, #[case] code: i32) {
		assert_eq!(code_of(&UnwindStage::parse(&spec).unwrap_err()), Some(code));
	}
}
