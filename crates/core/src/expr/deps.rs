use std::collections::BTreeSet;

use super::{FieldPath, PathRoot};

/// The document fields an expression or pipeline reads
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dependencies {
	pub fields: BTreeSet<String>,
	/// Set when something reads `$$ROOT` or `$$CURRENT` as a whole
	pub needs_whole_document: bool,
}

impl Dependencies {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add_path(&mut self, path: &FieldPath) {
		if !path.is_document_rooted() {
			return;
		}
		if path.fields.is_empty() {
			self.needs_whole_document = true;
		} else {
			self.fields.insert(path.dotted());
		}
	}

	pub fn add_field(&mut self, field: impl Into<String>) {
		self.fields.insert(field.into());
	}

	pub fn merge(&mut self, other: Dependencies) {
		self.fields.extend(other.fields);
		self.needs_whole_document |= other.needs_whole_document;
	}

	/// Whether nothing reads any part of the documents
	pub fn has_no_requirements(&self) -> bool {
		!self.needs_whole_document && self.fields.is_empty()
	}

	/// The top-level fields to include, or `None` if the whole document is needed. A path is
	/// dropped when one of its prefixes is already included.
	pub fn projection(&self) -> Option<Vec<String>> {
		if self.needs_whole_document {
			return None;
		}
		let mut out: Vec<String> = Vec::new();
		for field in &self.fields {
			let covered = out.iter().any(|p| field.starts_with(p.as_str()) && field[p.len()..].starts_with('.'));
			if !covered {
				out.push(field.clone());
			}
		}
		Some(out)
	}
}
