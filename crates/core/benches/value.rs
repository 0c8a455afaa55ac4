use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::Rng;
use sbe_core::val::{Decimal, Object, Value, array_to_set, hash_value, three_way};

fn numbers(n: usize) -> Vec<Value> {
	let mut rng = rand::thread_rng();
	(0..n)
		.map(|i| match i % 4 {
			0 => Value::NumberInt32(rng.gen_range(0..=5000)),
			1 => Value::NumberInt64(rng.gen_range(0..=5000)),
			2 => Value::NumberDouble(rng.gen_range(0.0..5000.0)),
			_ => Value::decimal(Decimal::from(rng.gen_range(0..=5000i64))),
		})
		.collect()
}

fn document(width: usize) -> Value {
	let mut obj = Object::new();
	for i in 0..width {
		obj.push(format!("field{i}"), Value::new_string(&format!("value number {i}")));
	}
	Value::Object(Box::new(obj))
}

fn bench_hashing(c: &mut Criterion) {
	let mut group = c.benchmark_group("hash_value");
	let values = numbers(1000);
	group.bench_function("mixed_numbers", |b| {
		b.iter(|| values.iter().fold(0u64, |acc, v| acc ^ hash_value(black_box(v), None)))
	});
	for width in [4, 32] {
		let doc = document(width);
		group.bench_with_input(BenchmarkId::new("document", width), &doc, |b, doc| b.iter(|| hash_value(black_box(doc), None)));
	}
	group.finish();
}

fn bench_comparison(c: &mut Criterion) {
	let mut group = c.benchmark_group("three_way");
	let values = numbers(1000);
	group.bench_function("mixed_numbers", |b| {
		b.iter(|| values.windows(2).filter_map(|w| three_way(black_box(&w[0]), black_box(&w[1]), None)).count())
	});
	let (lhs, rhs) = (document(32), document(32));
	group.bench_function("equal_documents", |b| b.iter(|| three_way(black_box(&lhs), black_box(&rhs), None)));
	group.finish();
}

fn bench_sets(c: &mut Criterion) {
	let values = Value::array(numbers(1000));
	c.bench_function("array_to_set", |b| b.iter(|| array_to_set(black_box(&values), None)));
}

criterion_group!(benches, bench_hashing, bench_comparison, bench_sets);
criterion_main!(benches);
