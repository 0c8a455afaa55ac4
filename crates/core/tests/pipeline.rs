//! Building the query executor at the head of a pipeline, then running the pipeline

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use anyhow::Result;
use sbe_core::err::code_of;
use sbe_core::pipeline::builder::{attach_inner_query_executor, build_inner_query_executor};
use sbe_core::pipeline::query::{Collection, IndexKind, IndexSpec, TimeseriesOptions};
use sbe_core::pipeline::stages::Stage;
use sbe_core::pipeline::{Pipeline, PipelineContext};
use sbe_core::val::handles::KeyRangeShardFilterer;
use sbe_core::val::json::to_json;
use sbe_core::val::Value;
use serde_json::{Value as Json, json};
use test_log::test;

fn pipeline(spec: Json) -> Pipeline {
	let ctx = PipelineContext {
		ns: "test.c".to_owned(),
		seed: Some(42),
	};
	Pipeline::parse(ctx, &spec).unwrap()
}

fn numbered(n: i64) -> Json {
	Json::Array((0..n).map(|i| json!({"_id": i, "a": i % 3, "b": i})).collect())
}

fn names(p: &Pipeline) -> Vec<&'static str> {
	p.stages().iter().map(Stage::name).collect()
}

/// The stages of an explained plan, outermost first
fn plan_stages(plan: &Json) -> Vec<String> {
	let mut out = Vec::new();
	let mut node = plan;
	while let Some(stage) = node["stage"].as_str() {
		out.push(stage.to_owned());
		node = &node["inputStage"];
	}
	out
}

/// Builds and attaches the executor, then runs the pipeline
fn run(coll: &Arc<Collection>, p: &mut Pipeline) -> Result<Vec<Json>> {
	let (callback, exec) = build_inner_query_executor(Some(coll), p)?;
	attach_inner_query_executor(coll, callback, exec, p)?;
	p.collect()?.iter().map(|doc| to_json(&doc.value)).collect()
}

#[test]
fn match_and_project_are_pushed_down() {
	let coll = Arc::new(Collection::from_json("test.c", &json!([{"_id": 1, "a": 1, "b": 2, "c": 3}, {"_id": 2, "a": 2}])).unwrap());
	let mut p = pipeline(json!([{"$match": {"a": 1}}, {"$project": {"a": 1, "b": 1}}]));
	let (callback, exec) = build_inner_query_executor(Some(&coll), &mut p).unwrap();
	assert!(p.is_empty());
	let exec = exec.unwrap();
	let plan = exec.explain();
	assert_eq!(plan["stage"], "PROJECTION_DEFAULT");
	assert_eq!(plan["transformBy"], json!({"a": 1, "b": 1}));
	assert_eq!(plan["inputStage"]["stage"], "COLLSCAN");
	assert_eq!(plan["inputStage"]["filter"], json!({"a": {"$eq": 1}}));
	attach_inner_query_executor(&coll, callback, Some(exec), &mut p).unwrap();
	assert_eq!(names(&p), vec!["$cursor"]);
	let out: Vec<Json> = p.collect().unwrap().iter().map(|d| to_json(&d.value).unwrap()).collect();
	assert_eq!(out, vec![json!({"_id": 1, "a": 1, "b": 2})]);
}

#[test]
fn skip_and_limit_move_ahead_of_computed_fields() {
	let coll = Arc::new(Collection::from_json("test.c", &numbered(10)).unwrap());
	let mut p = pipeline(json!([{"$addFields": {"c": 1}}, {"$skip": 2}, {"$limit": 3}]));
	let (_, exec) = build_inner_query_executor(Some(&coll), &mut p).unwrap();
	assert_eq!(names(&p), vec!["$addFields"]);
	let plan = exec.unwrap().explain();
	assert_eq!(plan["stage"], "LIMIT");
	assert_eq!(plan["limitAmount"], 3);
	assert_eq!(plan["inputStage"]["stage"], "SKIP");
	assert_eq!(plan["inputStage"]["skipAmount"], 2);

	let mut p = pipeline(json!([{"$addFields": {"c": 1}}, {"$skip": 2}, {"$limit": 3}]));
	let ids: Vec<Json> = run(&coll, &mut p).unwrap().into_iter().map(|d| d["_id"].clone()).collect();
	assert_eq!(ids, vec![json!(2), json!(3), json!(4)]);
}

#[test]
fn sort_carries_its_limit_and_skip_into_the_query() {
	let coll = Arc::new(Collection::from_json("test.c", &numbered(10)).unwrap());
	let mut p = pipeline(json!([{"$sort": {"b": -1}}, {"$skip": 1}, {"$limit": 2}]));
	let (_, exec) = build_inner_query_executor(Some(&coll), &mut p).unwrap();
	assert!(p.is_empty());
	let plan = exec.unwrap().explain();
	assert_eq!(plan_stages(&plan), vec!["LIMIT", "SKIP", "SORT", "COLLSCAN"]);
	assert_eq!(plan["limitAmount"], 2);
	assert_eq!(plan["inputStage"]["skipAmount"], 1);

	let mut p = pipeline(json!([{"$sort": {"b": -1}}, {"$skip": 1}, {"$limit": 2}]));
	let bs: Vec<Json> = run(&coll, &mut p).unwrap().into_iter().map(|d| d["b"].clone()).collect();
	assert_eq!(bs, vec![json!(8), json!(7)]);
}

#[test]
fn count_reads_no_fields() {
	let coll = Arc::new(Collection::from_json("test.c", &numbered(9)).unwrap());
	let mut p = pipeline(json!([{"$match": {"a": 1}}, {"$count": "n"}]));
	assert_eq!(run(&coll, &mut p).unwrap(), vec![json!({"n": 3})]);
}

#[test]
fn missing_collection_behaves_as_empty() {
	let mut p = pipeline(json!([{"$match": {"a": 1}}]));
	let (callback, exec) = build_inner_query_executor(None, &mut p).unwrap();
	let coll = Arc::new(Collection::new("test.c"));
	attach_inner_query_executor(&coll, callback, exec, &mut p).unwrap();
	assert!(p.collect().unwrap().is_empty());
}

#[test]
fn small_samples_use_a_random_cursor() {
	let coll = Arc::new(Collection::from_json("test.c", &numbered(200)).unwrap());
	let mut p = pipeline(json!([{"$sample": {"size": 5}}]));
	let (callback, exec) = build_inner_query_executor(Some(&coll), &mut p).unwrap();
	assert_eq!(names(&p), vec!["$sampleFromRandomCursor"]);
	assert_eq!(exec.as_ref().unwrap().explain()["stage"], "MULTI_ITERATOR");
	attach_inner_query_executor(&coll, callback, exec, &mut p).unwrap();
	let mut ids: Vec<i64> = p.collect().unwrap().iter().map(|d| to_json(&d.value).unwrap()["_id"].as_i64().unwrap()).collect();
	ids.sort_unstable();
	ids.dedup();
	assert_eq!(ids.len(), 5);
}

#[test]
fn large_samples_stay_in_the_pipeline() {
	let coll = Arc::new(Collection::from_json("test.c", &numbered(200)).unwrap());
	let mut p = pipeline(json!([{"$sample": {"size": 50}}]));
	let out = run(&coll, &mut p).unwrap();
	assert_eq!(out.len(), 50);
	assert_eq!(names(&p), vec!["$cursor", "$sample"]);

	let coll = Arc::new(Collection::from_json("test.c", &numbered(50)).unwrap());
	let mut p = pipeline(json!([{"$sample": {"size": 1}}]));
	assert_eq!(run(&coll, &mut p).unwrap().len(), 1);
	assert_eq!(names(&p), vec!["$cursor", "$sample"]);
}

#[test]
fn sharded_samples_fall_back_when_few_documents_are_owned() {
	let filter = KeyRangeShardFilterer::new("_id", vec![(Value::NumberInt32(0), Value::NumberInt32(10))]);
	let coll = Collection::from_json("test.c", &numbered(200)).unwrap().with_shard_filter(Arc::new(filter));
	let coll = Arc::new(coll);
	let mut p = pipeline(json!([{"$sample": {"size": 5}}]));
	let (callback, exec) = build_inner_query_executor(Some(&coll), &mut p).unwrap();
	let plan = exec.as_ref().unwrap().explain();
	assert_eq!(plan["stage"], "TRIAL");
	assert_eq!(plan["pickedBackupPlan"], true);
	assert_eq!(names(&p), vec!["$sample"]);
	attach_inner_query_executor(&coll, callback, exec, &mut p).unwrap();
	let out = p.collect().unwrap();
	assert_eq!(out.len(), 5);
	assert!(out.iter().all(|d| to_json(&d.value).unwrap()["_id"].as_i64().unwrap() < 10));
}

#[test]
fn sparse_buckets_fall_back_to_unpacking() {
	let buckets: Vec<Json> = (0..20).map(|i| json!({"_id": i, "meta": i, "data": {"t": {"0": i, "1": i + 100}}})).collect();
	let coll = Collection::from_json("test.buckets", &Json::Array(buckets)).unwrap().with_timeseries(TimeseriesOptions {
		time_field: "t".to_owned(),
		meta_field: Some("m".to_owned()),
	});
	let coll = Arc::new(coll);
	let mut p = pipeline(json!([{"$_internalUnpackBucket": {"timeField": "t", "metaField": "m"}}, {"$sample": {"size": 3}}]));
	let (callback, exec) = build_inner_query_executor(Some(&coll), &mut p).unwrap();
	assert_eq!(exec.as_ref().unwrap().explain()["pickedBackupPlan"], true);
	assert_eq!(names(&p), vec!["$sample"]);
	attach_inner_query_executor(&coll, callback, exec, &mut p).unwrap();
	let out = p.collect().unwrap();
	assert_eq!(out.len(), 3);
	assert!(out.iter().all(|d| !to_json(&d.value).unwrap()["m"].is_null()));
}

fn places() -> Collection {
	let docs = json!([
		{"_id": 1, "loc": [3, 0], "kind": "cafe"},
		{"_id": 2, "loc": [1, 0], "kind": "cafe"},
		{"_id": 3, "loc": [2, 0], "kind": "bar"},
		{"_id": 4, "loc": [9, 0], "kind": "cafe"},
	]);
	Collection::from_json("test.places", &docs).unwrap()
}

#[test]
fn geo_near_becomes_a_geo_cursor() {
	let coll = Arc::new(places().with_index(IndexSpec::new("loc", IndexKind::Geo2d)));
	let mut p = pipeline(json!([
		{"$geoNear": {"near": [0, 0], "distanceField": "d", "maxDistance": 5, "query": {"kind": "cafe"}, "distanceMultiplier": 2, "includeLocs": "at"}},
		{"$limit": 2},
	]));
	let out = run(&coll, &mut p).unwrap();
	assert_eq!(names(&p), vec!["$geoNearCursor", "$limit"]);
	assert_eq!(out.len(), 2);
	assert_eq!(out[0]["_id"], 2);
	assert_eq!(out[0]["d"], json!(2.0));
	assert_eq!(out[1]["_id"], 1);
	assert_eq!(out[1]["d"], json!(6.0));
	assert!(out[0].get("at").is_some());
}

#[test]
fn geo_near_needs_exactly_one_usable_index() {
	let spec = json!([{"$geoNear": {"near": [0, 0], "distanceField": "d"}}]);

	let err = build_inner_query_executor(None, &mut pipeline(spec.clone())).err().unwrap();
	assert_eq!(code_of(&err), Some(26));

	let coll = Arc::new(places());
	let err = build_inner_query_executor(Some(&coll), &mut pipeline(spec.clone())).err().unwrap();
	assert_eq!(code_of(&err), Some(27));

	let coll = Arc::new(
		places().with_index(IndexSpec::new("loc", IndexKind::Geo2d)).with_index(IndexSpec::new("other", IndexKind::Geo2d)),
	);
	let err = build_inner_query_executor(Some(&coll), &mut pipeline(spec)).err().unwrap();
	assert_eq!(code_of(&err), Some(27));
	assert!(err.to_string().contains("more than one 2d index"), "{err}");

	let coll = Arc::new(places().with_index(IndexSpec::new("loc", IndexKind::Geo2dSphere)));
	let keyed = json!([{"$geoNear": {"near": [0, 0], "distanceField": "d", "key": "elsewhere"}}]);
	let err = build_inner_query_executor(Some(&coll), &mut pipeline(keyed)).err().unwrap();
	assert_eq!(code_of(&err), Some(291));
}

#[test]
fn first_of_each_group_comes_from_a_distinct_scan() {
	let coll = Arc::new(Collection::from_json("test.c", &numbered(9)).unwrap().with_index(IndexSpec::new("a", IndexKind::Ascending)));
	let spec = json!([{"$sort": {"a": 1}}, {"$group": {"_id": "$a", "first": {"$first": "$b"}}}]);
	let mut p = pipeline(spec);
	let (callback, exec) = build_inner_query_executor(Some(&coll), &mut p).unwrap();
	assert_eq!(names(&p), vec!["$groupByDistinctScan"]);
	let plan = plan_stages(&exec.as_ref().unwrap().explain());
	assert_eq!(plan.last().map(String::as_str), Some("DISTINCT_SCAN"));
	assert!(plan.contains(&"FETCH".to_owned()), "{plan:?}");
	attach_inner_query_executor(&coll, callback, exec, &mut p).unwrap();
	let out: Vec<Json> = p.collect().unwrap().iter().map(|d| to_json(&d.value).unwrap()).collect();
	assert_eq!(out, vec![json!({"_id": 0, "first": 0}), json!({"_id": 1, "first": 1}), json!({"_id": 2, "first": 2})]);
}

#[test]
fn groups_without_an_index_fall_back_to_hashing() {
	let coll = Arc::new(Collection::from_json("test.c", &numbered(9)).unwrap());
	let mut p = pipeline(json!([{"$sort": {"a": 1}}, {"$group": {"_id": "$a", "first": {"$first": "$b"}}}]));
	let out = run(&coll, &mut p).unwrap();
	assert_eq!(names(&p), vec!["$cursor", "$group"]);
	assert_eq!(out, vec![json!({"_id": 0, "first": 0}), json!({"_id": 1, "first": 1}), json!({"_id": 2, "first": 2})]);
}

#[test]
fn generated_documents_need_no_executor() {
	let coll = Arc::new(Collection::from_json("test.c", &numbered(3)).unwrap());
	let mut p = pipeline(json!([{"$limit": 1}]));
	run(&coll, &mut p).unwrap();
	let (callback, exec) = build_inner_query_executor(Some(&coll), &mut p).unwrap();
	assert!(callback.is_none() && exec.is_none());
}
