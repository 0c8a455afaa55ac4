//! Proximity queries over `2d` and `2dsphere` indexed fields.

use std::cmp::Ordering;
use std::sync::Arc;

use anyhow::{Result, bail};
use serde_json::{Value as Json, json};

use super::collection::{Collection, IndexKind};
use super::exec::{Lifecycle, PlanExecutor, WorkState};
use super::matcher::MatchExpression;
use crate::err::Error;
use crate::pipeline::document::{Document, Metadata};
use crate::pipeline::projection::Projection;
use crate::val::{ArrayEnumerator, ObjectEnumerator, Value};

/// The radius of the earth used for spherical distances, in meters
pub const EARTH_RADIUS_METERS: f64 = 6_378_100.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
	pub x: f64,
	pub y: f64,
}

impl Point {
	/// Reads a GeoJSON point, a legacy `[x, y]` pair or a legacy `{x, y}` document.
	/// Returns the point and whether it was GeoJSON.
	pub fn from_value(value: &Value) -> Option<(Point, bool)> {
		if value.tag().is_object() && value.get_field("type").string_view() == Some("Point") {
			return Self::pair(&value.get_field("coordinates")).map(|p| (p, true));
		}
		Self::pair(value).map(|p| (p, false))
	}

	fn pair(value: &Value) -> Option<Point> {
		let tag = value.tag();
		if !tag.is_array() && !tag.is_object() {
			return None;
		}
		let mut coords = [0.0; 2];
		let mut count = 0;
		if tag.is_object() {
			let mut fields = ObjectEnumerator::new(value);
			while !fields.at_end() && count < 2 {
				coords[count] = fields.view().to_f64()?;
				count += 1;
				fields.advance();
			}
		} else {
			let mut it = ArrayEnumerator::new(value);
			while !it.at_end() && count < 2 {
				coords[count] = it.view().to_f64()?;
				count += 1;
				it.advance();
			}
		}
		(count == 2).then_some(Point {
			x: coords[0],
			y: coords[1],
		})
	}

	fn is_valid_lng_lat(&self) -> bool {
		(-180.0..=180.0).contains(&self.x) && (-90.0..=90.0).contains(&self.y)
	}

	pub fn to_value(self) -> Value {
		Value::array(vec![Value::NumberDouble(self.x), Value::NumberDouble(self.y)])
	}

	fn euclidean(&self, other: &Point) -> f64 {
		((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
	}

	/// The central angle between two longitude/latitude pairs, in radians
	fn angle(&self, other: &Point) -> f64 {
		let (lat1, lat2) = (self.y.to_radians(), other.y.to_radians());
		let dlat = lat2 - lat1;
		let dlng = (other.x - self.x).to_radians();
		let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
		2.0 * h.sqrt().min(1.0).asin()
	}
}

/// How distances are measured
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Metric {
	/// Flat distance in coordinate units
	Flat,
	/// Central angle in radians
	Radians,
	/// Distance over the surface of the earth in meters
	Meters,
}

impl Metric {
	/// Chooses the metric a query near `geo_json` point uses over an index of `kind`
	pub fn choose(kind: IndexKind, spherical: bool, geo_json: bool) -> Metric {
		match (kind, geo_json, spherical) {
			(IndexKind::Geo2dSphere, true, _) => Metric::Meters,
			(IndexKind::Geo2dSphere, false, _) => Metric::Radians,
			(_, _, true) => Metric::Radians,
			_ => Metric::Flat,
		}
	}

	fn distance(self, from: &Point, to: &Point) -> f64 {
		match self {
			Metric::Flat => from.euclidean(to),
			Metric::Radians => from.angle(to),
			Metric::Meters => from.angle(to) * EARTH_RADIUS_METERS,
		}
	}

	fn name(self) -> &'static str {
		match self {
			Metric::Flat => "flat",
			Metric::Radians => "radians",
			Metric::Meters => "meters",
		}
	}
}

/// A near predicate on one geo-indexed field
#[derive(Clone, Debug)]
pub struct NearQuery {
	pub field: String,
	pub near: Point,
	pub metric: Metric,
	pub min_distance: Option<f64>,
	pub max_distance: Option<f64>,
}

impl NearQuery {
	pub fn new(field: impl Into<String>, near: &Value, kind: IndexKind, spherical: bool) -> Result<Self> {
		let Some((point, geo_json)) = Point::from_value(near) else {
			bail!(Error::BadValue("$geoNear requires near argument to be a GeoJSON object or a legacy coordinate pair".into()));
		};
		let metric = Metric::choose(kind, spherical, geo_json);
		if metric != Metric::Flat && !point.is_valid_lng_lat() {
			bail!(Error::BadValue("Legacy point is out of bounds for spherical query".into()));
		}
		Ok(Self {
			field: field.into(),
			near: point,
			metric,
			min_distance: None,
			max_distance: None,
		})
	}

	pub fn serialize(&self) -> Json {
		let mut out = json!({
			self.field.as_str(): {"$near": [self.near.x, self.near.y], "metric": self.metric.name()},
		});
		if let Some(min) = self.min_distance {
			out[self.field.as_str()]["$minDistance"] = json!(min);
		}
		if let Some(max) = self.max_distance {
			out[self.field.as_str()]["$maxDistance"] = json!(max);
		}
		out
	}

	/// The distance from the query point to the closest location in the document
	fn distance(&self, doc: &Value) -> Option<(f64, Point)> {
		let mut found = Vec::new();
		doc.collect_path_values(&self.field, &mut found);
		let mut best: Option<(f64, Point)> = None;
		let mut consider = |value: &Value| {
			if let Some((point, _)) = Point::from_value(value) {
				if self.metric != Metric::Flat && !point.is_valid_lng_lat() {
					return;
				}
				let d = self.metric.distance(&self.near, &point);
				if best.is_none_or(|(b, _)| d < b) {
					best = Some((d, point));
				}
			}
		};
		for value in &found {
			match Point::from_value(value) {
				Some(_) => consider(value),
				// An array of locations
				None if value.tag().is_array() => {
					let mut it = ArrayEnumerator::new(value);
					while !it.at_end() {
						consider(it.view());
						it.advance();
					}
				}
				None => {}
			}
		}
		best
	}

	fn in_range(&self, d: f64) -> bool {
		self.min_distance.is_none_or(|min| d >= min) && self.max_distance.is_none_or(|max| d <= max)
	}
}

/// Returns the documents near a point, closest first
#[derive(Debug)]
pub struct NearExecutor {
	coll: Arc<Collection>,
	query: NearQuery,
	filter: Option<MatchExpression>,
	projection: Option<Projection>,
	results: Option<std::vec::IntoIter<(f64, Point, Value)>>,
	lifecycle: Lifecycle,
}

impl NearExecutor {
	pub fn new(
		coll: Arc<Collection>,
		query: NearQuery,
		filter: Option<MatchExpression>,
		projection: Option<Projection>,
	) -> Self {
		Self {
			coll,
			query,
			filter,
			projection,
			results: None,
			lifecycle: Lifecycle::default(),
		}
	}

	fn search(&self) -> Vec<(f64, Point, Value)> {
		let mut results: Vec<(f64, Point, Value)> = self
			.coll
			.documents()
			.iter()
			.filter(|doc| self.filter.as_ref().is_none_or(|f| f.matches(doc)))
			.filter_map(|doc| {
				let (d, p) = self.query.distance(doc)?;
				self.query.in_range(d).then(|| (d, p, doc.clone()))
			})
			.collect();
		results.sort_by(|l, r| l.0.partial_cmp(&r.0).unwrap_or(Ordering::Equal));
		results
	}
}

impl PlanExecutor for NearExecutor {
	fn name(&self) -> &'static str {
		"GEO_NEAR"
	}

	fn lifecycle(&mut self) -> &mut Lifecycle {
		&mut self.lifecycle
	}

	fn work(&mut self) -> Result<WorkState> {
		if self.results.is_none() {
			self.results = Some(self.search().into_iter());
		}
		let Some((distance, point, doc)) = self.results.as_mut().and_then(Iterator::next) else {
			return Ok(WorkState::IsEof);
		};
		let doc = match &mut self.projection {
			Some(projection) => projection.apply(&doc)?,
			None => doc,
		};
		let meta = Metadata {
			geo_near_distance: Some(distance),
			geo_near_point: Some(point.to_value()),
			..Default::default()
		};
		Ok(WorkState::Advanced(Document::with_meta(doc, meta)))
	}

	fn explain(&self) -> Json {
		let mut plan = json!({
			"stage": "GEO_NEAR",
			"namespace": self.coll.name(),
			"query": self.query.serialize(),
		});
		if let Some(filter) = &self.filter {
			plan["filter"] = filter.serialize();
		}
		match &self.projection {
			Some(projection) => json!({"stage": "PROJECTION_DEFAULT", "transformBy": projection.serialize(), "inputStage": plan}),
			None => plan,
		}
	}
}
