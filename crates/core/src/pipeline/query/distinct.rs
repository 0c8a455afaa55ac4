use std::cmp::Ordering;
use std::sync::Arc;

use anyhow::Result;
use serde_json::{Value as Json, json};

use super::collection::{Collection, IndexSpec};
use super::exec::{Lifecycle, PlanExecutor, WorkState};
use super::matcher::MatchExpression;
use crate::pipeline::document::Document;
use crate::pipeline::projection::Projection;
use crate::val::{Value, three_way};

/// Returns exactly one document per distinct value of an indexed field, in index order.
///
/// Within a run of equal keys the document which comes first in natural order is chosen.
#[derive(Debug)]
pub struct DistinctScan {
	coll: Arc<Collection>,
	index: IndexSpec,
	forward: bool,
	filter: Option<MatchExpression>,
	projection: Option<Projection>,
	/// The chosen documents, produced on first use
	chosen: Option<std::vec::IntoIter<Value>>,
	keys_examined: u64,
	lifecycle: Lifecycle,
}

impl DistinctScan {
	pub fn new(
		coll: Arc<Collection>,
		index: IndexSpec,
		forward: bool,
		filter: Option<MatchExpression>,
		projection: Option<Projection>,
	) -> Self {
		Self {
			coll,
			index,
			forward,
			filter,
			projection,
			chosen: None,
			keys_examined: 0,
			lifecycle: Lifecycle::default(),
		}
	}

	fn key_of(&self, doc: &Value) -> Value {
		match doc.get_path(&self.index.field) {
			Value::Nothing => Value::Null,
			key => key,
		}
	}

	fn choose(&mut self) -> Vec<Value> {
		let coll = self.coll.clone();
		let mut keyed: Vec<(Value, &Value)> = Vec::new();
		for doc in coll.documents() {
			if self.filter.as_ref().is_none_or(|f| f.matches(doc)) {
				keyed.push((self.key_of(doc), doc));
			}
		}
		keyed.sort_by(|(l, _), (r, _)| three_way(l, r, None).unwrap_or(Ordering::Equal));
		let mut chosen: Vec<Value> = Vec::new();
		let mut last: Option<&Value> = None;
		for (key, doc) in &keyed {
			self.keys_examined += 1;
			if last.is_some_and(|l| three_way(l, key, None) == Some(Ordering::Equal)) {
				continue;
			}
			last = Some(key);
			chosen.push((*doc).clone());
		}
		if !self.forward {
			chosen.reverse();
		}
		chosen
	}
}

impl PlanExecutor for DistinctScan {
	fn name(&self) -> &'static str {
		"DISTINCT_SCAN"
	}

	fn lifecycle(&mut self) -> &mut Lifecycle {
		&mut self.lifecycle
	}

	fn work(&mut self) -> Result<WorkState> {
		if self.chosen.is_none() {
			self.chosen = Some(self.choose().into_iter());
		}
		let Some(doc) = self.chosen.as_mut().and_then(Iterator::next) else {
			return Ok(WorkState::IsEof);
		};
		let doc = match &mut self.projection {
			Some(projection) => projection.apply(&doc)?,
			None => doc,
		};
		Ok(WorkState::Advanced(Document::new(doc)))
	}

	fn explain(&self) -> Json {
		let mut fetch = json!({
			"stage": "FETCH",
			"inputStage": {
				"stage": "DISTINCT_SCAN",
				"keyPattern": {self.index.field.as_str(): 1},
				"indexName": self.index.name,
				"direction": if self.forward { "forward" } else { "backward" },
				"keysExamined": self.keys_examined,
			},
		});
		if let Some(filter) = &self.filter {
			fetch["filter"] = filter.serialize();
		}
		match &self.projection {
			Some(projection) => json!({"stage": "PROJECTION_DEFAULT", "transformBy": projection.serialize(), "inputStage": fetch}),
			None => fetch,
		}
	}
}

/// Whether any document holds an array along the path, which makes an index on it multikey
pub fn is_multikey(coll: &Collection, path: &str) -> bool {
	coll.documents().iter().any(|doc| {
		let mut prefix = String::new();
		path.split('.').any(|part| {
			if !prefix.is_empty() {
				prefix.push('.');
			}
			prefix.push_str(part);
			doc.get_path(&prefix).tag().is_array()
		})
	})
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::pipeline::query::collection::IndexKind;
	use crate::val::json::to_json;

	fn collection() -> Arc<Collection> {
		let docs = json!([
			{"_id": 1, "a": 2},
			{"_id": 2, "a": 1},
			{"_id": 3, "a": 2},
			{"_id": 4},
		]);
		Arc::new(Collection::from_json("test.c", &docs).unwrap().with_index(IndexSpec::new("a", IndexKind::Ascending)))
	}

	#[test]
	fn one_document_per_key() {
		let coll = collection();
		let index = coll.indexes()[0].clone();
		let mut scan = DistinctScan::new(coll, index, true, None, None);
		let mut ids = Vec::new();
		while let Some(doc) = scan.get_next().unwrap() {
			ids.push(to_json(&doc.value).unwrap()["_id"].clone());
		}
		assert_eq!(ids, vec![json!(4), json!(2), json!(1)]);
	}

	#[test]
	fn arrays_make_an_index_multikey() {
		let coll = Collection::from_json("c", &json!([{"a": {"b": [1]}}, {"a": 1}])).unwrap();
		assert!(is_multikey(&coll, "a.b"));
		assert!(!is_multikey(&coll, "c"));
	}
}
