use super::env::RuntimeEnvironment;
use super::{FrameId, SlotId};
use crate::val::Value;

/// The register file which compiled stages and expressions execute against.
#[derive(Debug, Default)]
pub struct ExecCtx {
	slots: Vec<Value>,
	locals: Vec<(FrameId, Vec<Value>)>,
	accumulator: Option<Value>,
}

impl ExecCtx {
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates a context with every slot registered in the environment already populated
	pub fn from_env(env: &RuntimeEnvironment) -> Self {
		let mut ctx = Self::new();
		for (slot, value) in env.slots() {
			ctx.set(slot, value.clone());
		}
		ctx
	}

	/// A view of the value held by a slot. Slots which were never written hold `Nothing`.
	pub fn get(&self, slot: SlotId) -> &Value {
		self.slots.get(slot).unwrap_or(&Value::Nothing)
	}

	pub fn set(&mut self, slot: SlotId, value: Value) {
		if slot >= self.slots.len() {
			self.slots.resize_with(slot + 1, Value::default);
		}
		self.slots[slot] = value;
	}

	/// Moves the value out of a slot, leaving `Nothing` behind
	pub fn take(&mut self, slot: SlotId) -> Value {
		match self.slots.get_mut(slot) {
			Some(v) => std::mem::take(v),
			None => Value::Nothing,
		}
	}

	pub(crate) fn push_frame(&mut self, frame: FrameId, values: Vec<Value>) {
		self.locals.push((frame, values));
	}

	pub(crate) fn pop_frame(&mut self) {
		self.locals.pop();
	}

	/// Resolves a local variable, searching the innermost frames first
	pub fn local(&self, frame: FrameId, idx: usize) -> Option<&Value> {
		self.locals.iter().rev().find(|(id, _)| *id == frame).and_then(|(_, vals)| vals.get(idx))
	}

	/// Sets the running state which aggregate functions fold their input into
	pub(crate) fn set_accumulator(&mut self, value: Value) {
		self.accumulator = Some(value);
	}

	pub(crate) fn take_accumulator(&mut self) -> Value {
		self.accumulator.take().unwrap_or_default()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unwritten_slots_are_nothing() {
		let mut ctx = ExecCtx::new();
		assert!(ctx.get(40).is_nothing());
		ctx.set(3, Value::NumberInt32(1));
		assert!(matches!(ctx.get(3), Value::NumberInt32(1)));
		assert!(matches!(ctx.take(3), Value::NumberInt32(1)));
		assert!(ctx.get(3).is_nothing());
	}

	#[test]
	fn locals_shadow_outer_frames() {
		let mut ctx = ExecCtx::new();
		ctx.push_frame(1, vec![Value::NumberInt32(1)]);
		ctx.push_frame(1, vec![Value::NumberInt32(2)]);
		assert!(matches!(ctx.local(1, 0), Some(Value::NumberInt32(2))));
		ctx.pop_frame();
		assert!(matches!(ctx.local(1, 0), Some(Value::NumberInt32(1))));
		assert!(ctx.local(2, 0).is_none());
	}
}
