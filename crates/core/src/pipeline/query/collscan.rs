use std::sync::Arc;

use anyhow::Result;
use serde_json::{Value as Json, json};

use super::collection::Collection;
use super::exec::{Lifecycle, PlanExecutor, WorkState};
use super::matcher::MatchExpression;
use super::random::is_owned;
use crate::cnf::MAX_BUFFERED_DOCUMENTS;
use crate::pipeline::document::Document;
use crate::pipeline::projection::Projection;
use crate::val::{ShardFilterer, SortSpec, Value};

/// The parts of a find request which a collection scan applies, in this order
#[derive(Debug, Default)]
pub struct ScanParams {
	pub filter: Option<MatchExpression>,
	pub sort: Option<SortSpec>,
	pub skip: Option<u64>,
	pub limit: Option<u64>,
	pub projection: Option<Projection>,
	/// Set when only the documents owned by this shard may be returned
	pub shard_filter: Option<Arc<dyn ShardFilterer>>,
}

/// Scans a collection in natural order
#[derive(Debug)]
pub struct CollectionScan {
	coll: Arc<Collection>,
	params: ScanParams,
	/// The next record for a streaming scan
	position: usize,
	/// The sorted matches of a blocking scan, produced on first use
	sorted: Option<std::vec::IntoIter<Value>>,
	skipped: u64,
	returned: u64,
	examined: u64,
	lifecycle: Lifecycle,
}

impl CollectionScan {
	pub fn new(coll: Arc<Collection>, params: ScanParams) -> Self {
		Self {
			coll,
			params,
			position: 0,
			sorted: None,
			skipped: 0,
			returned: 0,
			examined: 0,
			lifecycle: Lifecycle::default(),
		}
	}

	fn matches(&self, doc: &Value) -> bool {
		self.params.shard_filter.as_ref().is_none_or(|s| is_owned(s.as_ref(), doc))
			&& self.params.filter.as_ref().is_none_or(|f| f.matches(doc))
	}

	fn sort_matches(&mut self, sort: &SortSpec) -> Result<std::vec::IntoIter<Value>> {
		let mut keyed = Vec::new();
		for doc in self.coll.documents() {
			self.examined += 1;
			if self.matches(doc) {
				uassert!(
					keyed.len() < *MAX_BUFFERED_DOCUMENTS,
					292,
					"Sort exceeded the buffered document limit of {}",
					*MAX_BUFFERED_DOCUMENTS
				);
				keyed.push((sort.generate_sort_key(doc), doc.clone()));
			}
		}
		keyed.sort_by(|(l, _), (r, _)| sort.compare_keys(l, r));
		Ok(keyed.into_iter().map(|(_, doc)| doc).collect::<Vec<_>>().into_iter())
	}

	fn next_candidate(&mut self) -> Result<Option<Option<Value>>> {
		if self.sorted.is_none() {
			if let Some(sort) = self.params.sort.take() {
				let sorted = self.sort_matches(&sort);
				self.params.sort = Some(sort);
				self.sorted = Some(sorted?);
			}
		}
		if let Some(sorted) = &mut self.sorted {
			return Ok(sorted.next().map(Some));
		}
		let Some(doc) = self.coll.documents().get(self.position) else {
			return Ok(None);
		};
		self.position += 1;
		self.examined += 1;
		Ok(Some(self.matches(doc).then(|| doc.clone())))
	}
}

impl PlanExecutor for CollectionScan {
	fn name(&self) -> &'static str {
		"COLLSCAN"
	}

	fn lifecycle(&mut self) -> &mut Lifecycle {
		&mut self.lifecycle
	}

	fn work(&mut self) -> Result<WorkState> {
		if self.params.limit.is_some_and(|l| self.returned >= l) {
			return Ok(WorkState::IsEof);
		}
		let doc = match self.next_candidate()? {
			None => return Ok(WorkState::IsEof),
			Some(None) => return Ok(WorkState::NeedTime),
			Some(Some(doc)) => doc,
		};
		if self.params.skip.is_some_and(|s| self.skipped < s) {
			self.skipped += 1;
			return Ok(WorkState::NeedTime);
		}
		self.returned += 1;
		let doc = match &mut self.params.projection {
			Some(projection) => projection.apply(&doc)?,
			None => doc,
		};
		Ok(WorkState::Advanced(Document::new(doc)))
	}

	fn explain(&self) -> Json {
		let mut plan = json!({
			"stage": "COLLSCAN",
			"namespace": self.coll.name(),
			"direction": "forward",
		});
		if let Some(filter) = &self.params.filter {
			plan["filter"] = filter.serialize();
		}
		if self.params.shard_filter.is_some() {
			plan = json!({"stage": "SHARDING_FILTER", "inputStage": plan});
		}
		if let Some(sort) = &self.params.sort {
			plan = json!({
				"stage": "SORT",
				"sortPattern": crate::val::json::to_json(&Value::Object(Box::new(sort.to_object()))).unwrap_or(Json::Null),
				"inputStage": plan,
			});
		}
		if let Some(skip) = self.params.skip {
			plan = json!({"stage": "SKIP", "skipAmount": skip, "inputStage": plan});
		}
		if let Some(limit) = self.params.limit {
			plan = json!({"stage": "LIMIT", "limitAmount": limit, "inputStage": plan});
		}
		if let Some(projection) = &self.params.projection {
			plan = json!({"stage": "PROJECTION_DEFAULT", "transformBy": projection.serialize(), "inputStage": plan});
		}
		plan
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::pipeline::query::parse_sort;
	use crate::val::json::to_json;

	fn collection() -> Arc<Collection> {
		let docs = json!([
			{"_id": 1, "a": 3, "b": "x"},
			{"_id": 2, "a": 1, "b": "y"},
			{"_id": 3, "a": 2, "b": "z"},
			{"_id": 4, "a": 5, "b": "w"},
		]);
		Arc::new(Collection::from_json("test.c", &docs).unwrap())
	}

	fn drain(exec: &mut dyn PlanExecutor) -> Vec<Json> {
		let mut out = Vec::new();
		while let Some(doc) = exec.get_next().unwrap() {
			out.push(to_json(&doc.value).unwrap());
		}
		out
	}

	#[test]
	fn filter_sort_skip_limit_project() {
		let params = ScanParams {
			filter: Some(MatchExpression::parse(&json!({"a": {"$gt": 1}})).unwrap()),
			sort: Some(SortSpec::new(parse_sort(&json!({"a": -1})).unwrap(), None)),
			skip: Some(1),
			limit: Some(1),
			projection: Some(Projection::parse(&json!({"a": 1, "_id": 0})).unwrap()),
			shard_filter: None,
		};
		let mut scan = CollectionScan::new(collection(), params);
		assert_eq!(drain(&mut scan), vec![json!({"a": 3})]);
		let plan = scan.explain();
		assert_eq!(plan["stage"], "PROJECTION_DEFAULT");
		assert_eq!(plan["inputStage"]["stage"], "LIMIT");
		assert_eq!(plan["inputStage"]["inputStage"]["inputStage"]["stage"], "SORT");
	}

	#[test]
	fn streaming_scan_keeps_natural_order() {
		let params = ScanParams {
			skip: Some(2),
			..Default::default()
		};
		let mut scan = CollectionScan::new(collection(), params);
		let ids: Vec<_> = drain(&mut scan).into_iter().map(|d| d["_id"].clone()).collect();
		assert_eq!(ids, vec![json!(3), json!(4)]);
	}

	#[test]
	fn saved_executors_refuse_work() {
		let mut scan = CollectionScan::new(collection(), ScanParams::default());
		scan.save_state().unwrap();
		assert!(scan.get_next().is_err());
		scan.restore_state().unwrap();
		assert!(scan.get_next().unwrap().is_some());
	}
}
