use std::fmt::Debug;

use anyhow::Result;
use serde_json::Value as Json;

use crate::pipeline::document::Document;

/// The outcome of one unit of work performed by a plan executor
#[derive(Debug)]
pub enum WorkState {
	Advanced(Document),
	/// Work was done but produced no document, for example a filtered document
	NeedTime,
	IsEof,
}

/// Whether an executor may currently produce documents
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Lifecycle {
	#[default]
	Active,
	Saved,
	Detached,
}

impl Lifecycle {
	pub fn check_active(&self, name: &str) -> Result<()> {
		tassert!(*self == Lifecycle::Active, 5521500, "{name} executor used while {self:?}");
		Ok(())
	}

	pub fn save(&mut self, name: &str) -> Result<()> {
		self.check_active(name)?;
		*self = Lifecycle::Saved;
		Ok(())
	}

	pub fn restore(&mut self, name: &str) -> Result<()> {
		tassert!(*self == Lifecycle::Saved, 5521501, "{name} executor restored while {self:?}");
		*self = Lifecycle::Active;
		Ok(())
	}

	pub fn detach(&mut self, name: &str) -> Result<()> {
		tassert!(*self == Lifecycle::Saved, 5521502, "{name} executor detached while {self:?}");
		*self = Lifecycle::Detached;
		Ok(())
	}

	pub fn reattach(&mut self, name: &str) -> Result<()> {
		tassert!(*self == Lifecycle::Detached, 5521503, "{name} executor reattached while {self:?}");
		*self = Lifecycle::Saved;
		Ok(())
	}
}

/// A query-engine executor producing documents for the head of a pipeline.
///
/// Executors follow a yield protocol: `save_state` before giving up the collection,
/// `detach`/`reattach` around a change of operation, then `restore_state` before producing
/// further results.
pub trait PlanExecutor: Debug {
	fn name(&self) -> &'static str;

	fn lifecycle(&mut self) -> &mut Lifecycle;

	/// Performs one unit of work
	fn work(&mut self) -> Result<WorkState>;

	/// Describes the executor's plan
	fn explain(&self) -> Json;

	/// Returns the next document, or `None` once the executor is exhausted
	fn get_next(&mut self) -> Result<Option<Document>> {
		let name = self.name();
		self.lifecycle().check_active(name)?;
		loop {
			match self.work()? {
				WorkState::Advanced(doc) => return Ok(Some(doc)),
				WorkState::NeedTime => continue,
				WorkState::IsEof => return Ok(None),
			}
		}
	}

	fn save_state(&mut self) -> Result<()> {
		let name = self.name();
		self.lifecycle().save(name)
	}

	fn restore_state(&mut self) -> Result<()> {
		let name = self.name();
		self.lifecycle().restore(name)
	}

	fn detach(&mut self) -> Result<()> {
		let name = self.name();
		self.lifecycle().detach(name)
	}

	fn reattach(&mut self) -> Result<()> {
		let name = self.name();
		self.lifecycle().reattach(name)
	}
}

pub type BoxedExecutor = Box<dyn PlanExecutor>;

#[cfg(test)]
mod tests {
	use super::*;
	use crate::err::code_of;

	#[test]
	fn yield_protocol_order() {
		let mut state = Lifecycle::default();
		state.save("test").unwrap();
		state.detach("test").unwrap();
		assert_eq!(code_of(&state.restore("test").unwrap_err()), Some(5521501));
		state.reattach("test").unwrap();
		state.restore("test").unwrap();
		assert_eq!(state, Lifecycle::Active);
		assert_eq!(code_of(&state.reattach("test").unwrap_err()), Some(5521503));
	}
}
