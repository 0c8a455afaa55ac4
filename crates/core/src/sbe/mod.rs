//! The slot-based execution layer.
//!
//! Compiled expressions and stages communicate through slots: numbered registers held by an
//! [`ExecCtx`]. A stage writes its outputs into slots when it advances, and any expression or
//! stage above it reads them back by number. Nothing here owns a document beyond the slot which
//! holds it.

pub mod ctx;
pub mod env;
pub mod expr;
pub mod stages;
pub mod vm;

/// The number of a slot in an [`ExecCtx`].
pub type SlotId = usize;

/// The number of a local binding frame introduced by [`EExpression::LocalBind`].
pub type FrameId = usize;

pub use self::ctx::ExecCtx;
pub use self::env::{FrameIdGenerator, RuntimeEnvironment, SlotIdGenerator};
pub use self::expr::{EExpression, EPrimBinaryOp, EPrimUnaryOp};
pub use self::stages::{BoxedStage, PlanStage, PlanState};
