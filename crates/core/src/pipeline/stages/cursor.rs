use std::collections::VecDeque;

use anyhow::{Result, bail, ensure};
use serde_json::{Map, Value as Json, json};

use super::{DepsState, DocumentSource, StageConstraints, Upstream};
use crate::cnf::CURSOR_BATCH_SIZE;
use crate::err::Error;
use crate::expr::Dependencies;
use crate::pipeline::document::{Document, set_path, to_object};
use crate::pipeline::query::{BoxedExecutor, MatchExpression};
use crate::val::Value;
use crate::val::json::from_json;

/// What the documents produced by a `$cursor` stage contain
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorType {
	Regular,
	/// Nothing downstream reads the documents, only their number
	EmptyDocuments,
}

/// The fields a geo cursor adds to each document
#[derive(Clone, Debug, PartialEq)]
pub struct GeoNearOutput {
	pub distance_field: String,
	pub include_locs: Option<String>,
	pub multiplier: f64,
}

/// The head of a pipeline whose documents come from a query executor.
///
/// The executor is kept saved and detached between batches.
#[derive(Debug)]
pub struct CursorStage {
	exec: BoxedExecutor,
	cursor_type: CursorType,
	geo: Option<GeoNearOutput>,
	batch: VecDeque<Document>,
	exhausted: bool,
}

impl CursorStage {
	pub fn new(mut exec: BoxedExecutor, cursor_type: CursorType, geo: Option<GeoNearOutput>) -> Result<Self> {
		exec.save_state()?;
		exec.detach()?;
		Ok(Self {
			exec,
			cursor_type,
			geo,
			batch: VecDeque::new(),
			exhausted: false,
		})
	}

	pub fn cursor_type(&self) -> CursorType {
		self.cursor_type
	}

	fn load_batch(&mut self) -> Result<()> {
		self.exec.reattach()?;
		self.exec.restore_state()?;
		while self.batch.len() < *CURSOR_BATCH_SIZE {
			let Some(doc) = self.exec.get_next()? else {
				self.exhausted = true;
				break;
			};
			let doc = self.transform(doc);
			self.batch.push_back(doc);
		}
		trace!(target: "sbe::pipeline", docs = self.batch.len(), exhausted = self.exhausted, "loaded a cursor batch");
		self.exec.save_state()?;
		self.exec.detach()
	}

	fn transform(&self, doc: Document) -> Document {
		if self.cursor_type == CursorType::EmptyDocuments {
			return Document::with_meta(Value::new_object(), doc.meta);
		}
		let Some(geo) = &self.geo else {
			return doc;
		};
		let mut obj = to_object(doc.value);
		if let Some(distance) = doc.meta.geo_near_distance {
			set_path(&mut obj, &geo.distance_field, Value::NumberDouble(distance * geo.multiplier));
		}
		if let (Some(field), Some(point)) = (&geo.include_locs, &doc.meta.geo_near_point) {
			set_path(&mut obj, field, point.clone());
		}
		Document::with_meta(Value::Object(Box::new(obj)), doc.meta)
	}
}

impl DocumentSource for CursorStage {
	fn name(&self) -> &'static str {
		match self.geo {
			Some(_) => "$geoNearCursor",
			None => "$cursor",
		}
	}

	fn constraints(&self) -> StageConstraints {
		StageConstraints {
			requires_input_doc_source: false,
			..StageConstraints::default()
		}
	}

	fn get_next(&mut self, _input: &mut Upstream<'_>) -> Result<Option<Document>> {
		if self.batch.is_empty() && !self.exhausted {
			self.load_batch()?;
		}
		Ok(self.batch.pop_front())
	}

	fn serialize(&self) -> Json {
		json!({self.name(): {"queryPlanner": {"winningPlan": self.exec.explain()}}})
	}
}

/// `$geoNear`, which only ever runs as the front of a pipeline: the builder replaces it with a
/// geo cursor
#[derive(Debug)]
pub struct GeoNearStage {
	spec: Json,
	near: Value,
	distance_field: String,
	key: Option<String>,
	spherical: bool,
	min_distance: Option<f64>,
	max_distance: Option<f64>,
	query: Option<MatchExpression>,
	include_locs: Option<String>,
	distance_multiplier: Option<f64>,
}

fn number(map: &Map<String, Json>, name: &str) -> Result<Option<f64>> {
	match map.get(name) {
		None => Ok(None),
		Some(value) => match value.as_f64() {
			Some(n) => Ok(Some(n)),
			None => bail!(Error::fail(16605, format!("{name} must be a number"))),
		},
	}
}

fn string(map: &Map<String, Json>, name: &str) -> Result<Option<String>> {
	match map.get(name) {
		None => Ok(None),
		Some(Json::String(s)) => Ok(Some(s.clone())),
		Some(_) => bail!(Error::fail(16607, format!("$geoNear requires that '{name}' option is a String"))),
	}
}

impl GeoNearStage {
	pub fn parse(spec: &Json) -> Result<Self> {
		let Json::Object(map) = spec else {
			bail!(Error::fail(10065, "$geoNear requires an object as its argument"));
		};
		let Some(near) = map.get("near") else {
			bail!(Error::fail(5860400, "$geoNear requires a 'near' argument"));
		};
		let Some(distance_field) = string(map, "distanceField")? else {
			bail!(Error::fail(16606, "$geoNear requires a 'distanceField' option as a String"));
		};
		let key = match map.get("key") {
			None => None,
			Some(Json::String(key)) => {
				ensure!(!key.is_empty(), Error::fail(5626501, "$geoNear parameter 'key' cannot be the empty string"));
				Some(key.clone())
			}
			Some(_) => bail!(Error::fail(5626500, "$geoNear parameter 'key' must be of type string")),
		};
		let query = match map.get("query") {
			None => None,
			Some(query @ Json::Object(_)) => Some(MatchExpression::parse(query)?),
			Some(_) => bail!(Error::fail(16602, "query must be an object")),
		};
		let distance_multiplier = number(map, "distanceMultiplier")?;
		if let Some(m) = distance_multiplier {
			ensure!(m >= 0.0, Error::fail(16607, "distanceMultiplier must be nonnegative"));
		}
		Ok(Self {
			spec: spec.clone(),
			near: from_json(near)?,
			distance_field,
			key,
			spherical: map.get("spherical").and_then(Json::as_bool).unwrap_or(false),
			min_distance: number(map, "minDistance")?,
			max_distance: number(map, "maxDistance")?,
			query,
			include_locs: string(map, "includeLocs")?,
			distance_multiplier,
		})
	}

	pub fn near(&self) -> &Value {
		&self.near
	}

	pub fn key(&self) -> Option<&str> {
		self.key.as_deref()
	}

	pub fn spherical(&self) -> bool {
		self.spherical
	}

	pub fn min_distance(&self) -> Option<f64> {
		self.min_distance
	}

	pub fn max_distance(&self) -> Option<f64> {
		self.max_distance
	}

	pub fn query(&self) -> Option<&MatchExpression> {
		self.query.as_ref()
	}

	pub fn distance_multiplier(&self) -> Option<f64> {
		self.distance_multiplier
	}

	/// The fields the geo cursor will add, using `default_multiplier` when none was given
	pub fn output(&self, default_multiplier: f64) -> GeoNearOutput {
		GeoNearOutput {
			distance_field: self.distance_field.clone(),
			include_locs: self.include_locs.clone(),
			multiplier: self.distance_multiplier.unwrap_or(default_multiplier),
		}
	}
}

impl DocumentSource for GeoNearStage {
	fn name(&self) -> &'static str {
		"$geoNear"
	}

	/// The geo cursor returns whole documents with their distance attached
	fn get_dependencies(&self, _deps: &mut Dependencies) -> DepsState {
		DepsState::ExhaustiveAll
	}

	fn get_next(&mut self, _input: &mut Upstream<'_>) -> Result<Option<Document>> {
		bail!(Error::fail(40603, "$geoNear is only valid as the first stage in a pipeline."))
	}

	fn serialize(&self) -> Json {
		json!({"$geoNear": self.spec})
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use rstest::rstest;

	use super::*;
	use crate::err::code_of;
	use crate::pipeline::query::Collection;
	use crate::pipeline::query::collscan::{CollectionScan, ScanParams};
	use crate::val::json::to_json;

	fn scan(docs: Json) -> BoxedExecutor {
		let coll = Arc::new(Collection::from_json("test.c", &docs).unwrap());
		Box::new(CollectionScan::new(coll, ScanParams::default()))
	}

	#[test]
	fn empty_documents_keep_their_count() {
		let mut stage = CursorStage::new(scan(json!([{"a": 1}, {"a": 2}])), CursorType::EmptyDocuments, None).unwrap();
		let mut upstream = Upstream::new(&mut []);
		let mut out = Vec::new();
		while let Some(doc) = stage.get_next(&mut upstream).unwrap() {
			out.push(to_json(&doc.value).unwrap());
		}
		assert_eq!(out, vec![json!({}), json!({})]);
	}

	#[test]
	fn cursor_explains_its_plan() {
		let stage = CursorStage::new(scan(json!([])), CursorType::Regular, None).unwrap();
		let explained = stage.serialize();
		assert_eq!(explained["$cursor"]["queryPlanner"]["winningPlan"]["stage"], json!("COLLSCAN"));
		assert!(!stage.constraints().requires_input_doc_source);
	}

	#[test]
	fn geo_near_options() {
		let stage = GeoNearStage::parse(&json!({
			"near": [0, 0],
			"distanceField": "dist",
			"key": "loc",
			"maxDistance": 10,
			"includeLocs": "where",
		}))
		.unwrap();
		assert_eq!(stage.key(), Some("loc"));
		assert_eq!(stage.max_distance(), Some(10.0));
		assert_eq!(
			stage.output(1.0),
			GeoNearOutput {
				distance_field: "dist".into(),
				include_locs: Some("where".into()),
				multiplier: 1.0,
			}
		);
	}

	#[rstest]
	#[case::no_near(json!({"distanceField": "d"}), 5860400)]
	#[case::no_distance_field(json!({"near": [0, 0]}), 16606)]
	#[case::numeric_key(json!({"near": [0, 0], "distanceField": "d", "key": 1}), 5626500)]
	#[case::empty_key(json!({"near": [0, 0], "distanceField": "d", "key": ""}), 5626501)]
	fn invalid_geo_near(#[case] spec: Json, #[case] code: i32) {
		assert_eq!(code_of(&GeoNearStage::parse(&spec).unwrap_err()), Some(code));
	}
}
