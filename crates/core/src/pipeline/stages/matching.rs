use anyhow::{Result, ensure};
use serde_json::{Value as Json, json};

use super::{DepsState, DocumentSource, Upstream};
use crate::err::Error;
use crate::expr::Dependencies;
use crate::pipeline::document::Document;
use crate::pipeline::query::MatchExpression;

/// `$match`
#[derive(Debug)]
pub struct MatchStage {
	expr: MatchExpression,
}

impl MatchStage {
	pub fn parse(spec: &Json) -> Result<Self> {
		ensure!(spec.is_object(), Error::fail(15959, "the match filter must be an expression in an object"));
		Ok(Self {
			expr: MatchExpression::parse(spec)?,
		})
	}

	pub fn expression(&self) -> &MatchExpression {
		&self.expr
	}

	/// The filter in query form, as pushed down into a find
	pub fn query(&self) -> Json {
		self.expr.serialize()
	}

	pub fn is_trivially_true(&self) -> bool {
		self.expr.is_trivially_true()
	}

	/// Folds the following `$match` into this one
	pub fn join(&mut self, next: MatchStage) {
		let expr = std::mem::replace(&mut self.expr, MatchExpression::AlwaysTrue);
		self.expr = expr.and(next.expr);
	}
}

impl DocumentSource for MatchStage {
	fn name(&self) -> &'static str {
		"$match"
	}

	fn get_dependencies(&self, deps: &mut Dependencies) -> DepsState {
		self.expr.add_dependencies(deps);
		DepsState::SeeNext
	}

	fn get_next(&mut self, input: &mut Upstream<'_>) -> Result<Option<Document>> {
		while let Some(doc) = input.next()? {
			if self.expr.matches(&doc.value) {
				return Ok(Some(doc));
			}
		}
		Ok(None)
	}

	fn serialize(&self) -> Json {
		json!({"$match": self.query()})
	}
}
