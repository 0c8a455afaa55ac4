use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, bail};

use crate::err::Error;
use crate::expr::VariableId;
use crate::sbe::stages::{CoScanStage, LimitSkipStage};
use crate::sbe::env::{COLLATOR, TIME_ZONE_DB};
use crate::sbe::{BoxedStage, EExpression, FrameIdGenerator, RuntimeEnvironment, SlotId, SlotIdGenerator};
use crate::val::Collator;

/// Everything one compilation shares with whoever runs its output
#[derive(Debug, Default)]
pub struct CompilerState {
	pub slots: SlotIdGenerator,
	pub frames: FrameIdGenerator,
	pub env: RuntimeEnvironment,
}

impl CompilerState {
	/// A state whose environment holds the time zone database and, when given, a collator
	pub fn new(collator: Option<Arc<dyn Collator>>) -> Result<Self> {
		let mut slots = SlotIdGenerator::new();
		let env = RuntimeEnvironment::with_defaults(&mut slots, collator)?;
		Ok(Self {
			slots,
			frames: FrameIdGenerator::new(),
			env,
		})
	}
}

/// One level of the compiler's stack: the expressions compiled so far at this level, and the
/// stage their side-effecting sub-plans have been attached to. A frame without a stage feeds from
/// a single empty row.
#[derive(Debug, Default)]
pub(crate) struct Frame {
	pub exprs: Vec<EExpression>,
	pub stage: Option<BoxedStage>,
}

/// Branches of a multi-branch construct which have already been compiled
#[derive(Debug, Default)]
pub(crate) struct Branches {
	/// Each finished branch and the slot holding its result
	pub done: Vec<(BoxedStage, SlotId)>,
	/// A `$switch` case guard which is waiting for its `then`
	pub pending_case: Option<BoxedStage>,
}

/// A `$filter` whose input has been compiled
#[derive(Debug)]
pub(crate) struct FilterInput {
	pub input_slot: SlotId,
	pub not_null_slot: SlotId,
	pub this: VariableId,
}

pub struct ExpressionVisitorContext<'a> {
	pub state: &'a mut CompilerState,
	pub(crate) frames: Vec<Frame>,
	/// Slots holding the values of the variables currently in scope
	pub environment: HashMap<VariableId, SlotId>,
	/// The slot holding the document that unqualified field paths start from
	pub root_slot: SlotId,
	pub(crate) branches: Vec<Branches>,
	pub(crate) filters: Vec<FilterInput>,
	/// The variables bound by each `$let` being compiled
	pub(crate) lets: Vec<Vec<VariableId>>,
}

pub(crate) fn one_row() -> BoxedStage {
	Box::new(LimitSkipStage::new(Box::new(CoScanStage::new()), Some(1), 0))
}

impl<'a> ExpressionVisitorContext<'a> {
	pub fn new(state: &'a mut CompilerState, stage: BoxedStage, root_slot: SlotId) -> Self {
		Self {
			state,
			frames: vec![Frame {
				exprs: vec![],
				stage: Some(stage),
			}],
			environment: HashMap::new(),
			root_slot,
			branches: vec![],
			filters: vec![],
			lets: vec![],
		}
	}

	fn top(&mut self) -> Result<&mut Frame> {
		match self.frames.last_mut() {
			Some(frame) => Ok(frame),
			None => Err(Error::assertion(5611700, "the compiler frame stack is empty").into()),
		}
	}

	pub fn push_expr(&mut self, expr: EExpression) -> Result<()> {
		self.top()?.exprs.push(expr);
		Ok(())
	}

	pub fn pop_expr(&mut self) -> Result<EExpression> {
		let popped = self.top()?.exprs.pop();
		match popped {
			Some(expr) => Ok(expr),
			None => Err(Error::assertion(5611701, "no compiled expression to pop").into()),
		}
	}

	/// Pops the last `count` expressions, in the order they were pushed
	pub fn pop_exprs(&mut self, count: usize) -> Result<Vec<EExpression>> {
		let frame = self.top()?;
		tassert!(frame.exprs.len() >= count, 5611702, "expected {count} compiled expressions, found {}", frame.exprs.len());
		let at = frame.exprs.len() - count;
		Ok(frame.exprs.split_off(at))
	}

	/// Takes the current stage, to be extended and put back with [`Self::set_stage`]
	pub fn take_stage(&mut self) -> Result<BoxedStage> {
		Ok(self.top()?.stage.take().unwrap_or_else(one_row))
	}

	pub fn set_stage(&mut self, stage: BoxedStage) -> Result<()> {
		self.top()?.stage = Some(stage);
		Ok(())
	}

	pub(crate) fn push_frame(&mut self) {
		self.frames.push(Frame::default());
	}

	/// Removes the current frame, returning its single expression and its stage
	pub(crate) fn pop_frame(&mut self) -> Result<(EExpression, BoxedStage)> {
		let Some(mut frame) = self.frames.pop() else {
			bail!(Error::assertion(5611700, "the compiler frame stack is empty"));
		};
		tassert!(frame.exprs.len() == 1, 5611703, "a branch frame must hold exactly one expression, found {}", frame.exprs.len());
		let stage = frame.stage.take().unwrap_or_else(one_row);
		match frame.exprs.pop() {
			Some(expr) => Ok((expr, stage)),
			None => Err(Error::assertion(5611703, "a branch frame must hold exactly one expression").into()),
		}
	}

	pub(crate) fn branches(&mut self) -> Result<&mut Branches> {
		match self.branches.last_mut() {
			Some(b) => Ok(b),
			None => Err(Error::assertion(5611704, "no multi-branch construct is being compiled").into()),
		}
	}

	pub fn generate_slot(&mut self) -> SlotId {
		self.state.slots.generate()
	}

	pub fn frame_ids(&mut self) -> &mut FrameIdGenerator {
		&mut self.state.frames
	}

	/// A reference to the collator slot, when the environment has one
	pub fn collator_var(&self) -> Option<EExpression> {
		self.state.env.get_slot_if_exists(COLLATOR).map(EExpression::var)
	}

	pub fn collator_slot(&self) -> Option<SlotId> {
		self.state.env.get_slot_if_exists(COLLATOR)
	}

	pub fn time_zone_db_var(&self) -> Result<EExpression> {
		match self.state.env.get_slot_if_exists(TIME_ZONE_DB) {
			Some(slot) => Ok(EExpression::var(slot)),
			None => Err(Error::assertion(5611705, "the environment has no time zone database").into()),
		}
	}

	/// Finishes compilation, returning the single result expression and the final stage
	pub(crate) fn done(mut self) -> Result<(EExpression, BoxedStage)> {
		tassert!(self.frames.len() == 1, 5611706, "unbalanced compiler frames: {}", self.frames.len());
		self.pop_frame()
	}
}
