use anyhow::Result;

use crate::expr::Expression;

/// Callbacks for a depth-first walk over an expression tree
pub trait ExpressionVisitor {
	/// Called before any child of `expr` is visited
	fn pre_visit(&mut self, expr: &Expression) -> Result<()>;
	/// Called between children, just before child `index` is visited. Never called for the first child.
	fn in_visit(&mut self, expr: &Expression, index: usize) -> Result<()>;
	/// Called after every child of `expr` has been visited
	fn post_visit(&mut self, expr: &Expression) -> Result<()>;
}

pub fn walk<V: ExpressionVisitor + ?Sized>(expr: &Expression, visitor: &mut V) -> Result<()> {
	visitor.pre_visit(expr)?;
	for (index, child) in expr.children.iter().enumerate() {
		if index > 0 {
			visitor.in_visit(expr, index)?;
		}
		walk(child, visitor)?;
	}
	visitor.post_visit(expr)
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::expr::parse_expression;

	#[derive(Default)]
	struct Recorder(Vec<String>);

	impl ExpressionVisitor for Recorder {
		fn pre_visit(&mut self, expr: &Expression) -> Result<()> {
			self.0.push(format!("pre {}", expr.kind.name()));
			Ok(())
		}

		fn in_visit(&mut self, expr: &Expression, index: usize) -> Result<()> {
			self.0.push(format!("in {} {index}", expr.kind.name()));
			Ok(())
		}

		fn post_visit(&mut self, expr: &Expression) -> Result<()> {
			self.0.push(format!("post {}", expr.kind.name()));
			Ok(())
		}
	}

	#[test]
	fn hooks_run_around_children() {
		let expr = parse_expression(&json!({"$add": ["$a", {"$abs": "$b"}]})).unwrap();
		let mut recorder = Recorder::default();
		walk(&expr, &mut recorder).unwrap();
		assert_eq!(
			recorder.0,
			[
				"pre $add",
				"pre $fieldPath",
				"post $fieldPath",
				"in $add 1",
				"pre $abs",
				"pre $fieldPath",
				"post $fieldPath",
				"post $abs",
				"post $add",
			]
		);
	}
}
