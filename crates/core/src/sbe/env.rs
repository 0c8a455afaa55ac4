use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::{FrameId, SlotId};
use crate::val::{Collator, TimeZoneDatabase, Value};

/// The well-known name of the slot holding the time zone database
pub const TIME_ZONE_DB: &str = "timeZoneDB";
/// The well-known name of the slot holding the active collator
pub const COLLATOR: &str = "collator";
/// The name of the slot holding the `$$NOW` date
pub const NOW: &str = "NOW";

/// Hands out fresh slot numbers. Slot zero is never handed out.
#[derive(Debug, Clone, Default)]
pub struct SlotIdGenerator {
	last: SlotId,
}

impl SlotIdGenerator {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn generate(&mut self) -> SlotId {
		self.last += 1;
		self.last
	}

	pub fn generate_many(&mut self, count: usize) -> Vec<SlotId> {
		(0..count).map(|_| self.generate()).collect()
	}
}

/// Hands out fresh local frame numbers.
#[derive(Debug, Clone, Default)]
pub struct FrameIdGenerator {
	last: FrameId,
}

impl FrameIdGenerator {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn generate(&mut self) -> FrameId {
		self.last += 1;
		self.last
	}
}

/// A registry of named global values, each resolved to a slot once.
///
/// Compiled expressions reference these values by slot, and every execution context built from
/// this environment starts with them populated.
#[derive(Debug, Clone, Default)]
pub struct RuntimeEnvironment {
	names: HashMap<String, SlotId>,
	values: Vec<(SlotId, Value)>,
}

impl RuntimeEnvironment {
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates an environment holding a time zone database, the current time and, optionally, a
	/// collator
	pub fn with_defaults(
		slots: &mut SlotIdGenerator,
		collator: Option<Arc<dyn Collator>>,
	) -> Result<Self> {
		Self::with_defaults_at(slots, collator, Utc::now())
	}

	/// Like [`RuntimeEnvironment::with_defaults`], with `$$NOW` fixed at `now`
	pub fn with_defaults_at(
		slots: &mut SlotIdGenerator,
		collator: Option<Arc<dyn Collator>>,
		now: DateTime<Utc>,
	) -> Result<Self> {
		let mut env = Self::new();
		env.register_slot(TIME_ZONE_DB, Value::TimeZoneDB(Arc::new(TimeZoneDatabase::new())), slots)?;
		env.register_slot(NOW, Value::Date(now.timestamp_millis()), slots)?;
		if let Some(collator) = collator {
			env.register_slot(COLLATOR, Value::Collator(collator), slots)?;
		}
		Ok(env)
	}

	/// Binds a name to a fresh slot holding `value`. A name may only be registered once.
	pub fn register_slot(
		&mut self,
		name: &str,
		value: Value,
		slots: &mut SlotIdGenerator,
	) -> Result<SlotId> {
		tassert!(!self.names.contains_key(name), 5611400, "slot '{name}' is already registered");
		let slot = slots.generate();
		self.names.insert(name.to_owned(), slot);
		self.values.push((slot, value));
		Ok(slot)
	}

	pub fn get_slot_if_exists(&self, name: &str) -> Option<SlotId> {
		self.names.get(name).copied()
	}

	/// Replaces the value bound to an already registered slot
	pub fn reset_slot(&mut self, slot: SlotId, value: Value) {
		if let Some(entry) = self.values.iter_mut().find(|(s, _)| *s == slot) {
			entry.1 = value;
		}
	}

	pub fn slots(&self) -> impl Iterator<Item = (SlotId, &Value)> {
		self.values.iter().map(|(slot, value)| (*slot, value))
	}

	/// The collator bound in this environment, if any
	pub fn collator(&self) -> Option<Arc<dyn Collator>> {
		let slot = self.get_slot_if_exists(COLLATOR)?;
		self.values.iter().find(|(s, _)| *s == slot).and_then(|(_, v)| match v {
			Value::Collator(c) => Some(c.clone()),
			_ => None,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::err::code_of;
	use crate::val::handles::CaseInsensitiveCollator;

	#[test]
	fn registers_each_name_once() {
		let mut slots = SlotIdGenerator::new();
		let mut env = RuntimeEnvironment::new();
		let a = env.register_slot("a", Value::NumberInt32(1), &mut slots).unwrap();
		assert_eq!(env.get_slot_if_exists("a"), Some(a));
		assert_eq!(env.get_slot_if_exists("b"), None);
		let err = env.register_slot("a", Value::Null, &mut slots).unwrap_err();
		assert_eq!(code_of(&err), Some(5611400));
	}

	#[test]
	fn defaults_expose_the_collator() {
		let mut slots = SlotIdGenerator::new();
		let env = RuntimeEnvironment::with_defaults(&mut slots, None).unwrap();
		assert!(env.get_slot_if_exists(TIME_ZONE_DB).is_some());
		assert!(env.collator().is_none());
		let env =
			RuntimeEnvironment::with_defaults(&mut slots, Some(Arc::new(CaseInsensitiveCollator)))
				.unwrap();
		assert!(env.collator().is_some());
	}

	#[test]
	fn now_is_a_fixed_date() {
		let mut slots = SlotIdGenerator::new();
		let at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
		let env = RuntimeEnvironment::with_defaults_at(&mut slots, None, at).unwrap();
		let slot = env.get_slot_if_exists(NOW).unwrap();
		let now = env.slots().find(|(s, _)| *s == slot).map(|(_, v)| v.clone());
		assert!(matches!(now, Some(Value::Date(1_700_000_000_123))));
	}
}
