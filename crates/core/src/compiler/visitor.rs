//! Lowering of control flow, variables and field paths.
//!
//! Constructs which must evaluate their operands lazily are compiled into sub-plans rather than
//! scalar expressions. Each branch is compiled in its own frame, and the finished branches are
//! combined under a union which yields the first branch to produce a row. A loop join attaches
//! that union to the current stage, so it runs once per input row.

use anyhow::{Result, bail};

use super::context::{Branches, ExpressionVisitorContext, FilterInput, one_row};
use super::helpers::{coerce_to_bool, null_or_missing};
use super::leaf;
use super::walker::ExpressionVisitor;
use crate::err::Error;
use crate::expr::{ExprKind, Expression, FieldPath, PathRoot};
use crate::sbe::stages::{FilterStage, LimitSkipStage, LoopJoinStage, ProjectStage, TraverseStage, UnionStage};
use crate::sbe::{BoxedStage, EExpression, SlotId};
use crate::val::tags::mask;

#[derive(Clone, Copy)]
enum Logic {
	And,
	Or,
}

fn is_multi_branch(expr: &Expression) -> bool {
	match &expr.kind {
		ExprKind::And | ExprKind::Or => expr.children.len() > 1,
		ExprKind::Cond
		| ExprKind::Switch {
			..
		}
		| ExprKind::IfNull => true,
		_ => false,
	}
}

impl ExpressionVisitor for ExpressionVisitorContext<'_> {
	fn pre_visit(&mut self, expr: &Expression) -> Result<()> {
		if let ExprKind::Unsupported(name) = &expr.kind {
			bail!(Error::assertion(5182300, format!("Unsupported expression in SBE stage builder: {name}")));
		}
		if is_multi_branch(expr) {
			self.branches.push(Branches::default());
			self.push_frame();
		}
		if let ExprKind::Let {
			vars,
		} = &expr.kind
		{
			self.lets.push(vars.iter().map(|(id, _)| *id).collect());
		}
		Ok(())
	}

	fn in_visit(&mut self, expr: &Expression, index: usize) -> Result<()> {
		match &expr.kind {
			ExprKind::And if expr.children.len() > 1 => {
				self.finish_logic_branch(Logic::And, false)?;
				self.push_frame();
			}
			ExprKind::Or if expr.children.len() > 1 => {
				self.finish_logic_branch(Logic::Or, false)?;
				self.push_frame();
			}
			ExprKind::Cond => {
				match index {
					1 => self.finish_case_guard()?,
					_ => self.finish_case_then()?,
				}
				self.push_frame();
			}
			ExprKind::Switch {
				..
			} => {
				// The child which just finished is a case guard when its index is even
				if (index - 1) % 2 == 0 {
					self.finish_case_guard()?;
				} else {
					self.finish_case_then()?;
				}
				self.push_frame();
			}
			ExprKind::IfNull => {
				self.finish_if_null_branch(false)?;
				self.push_frame();
			}
			ExprKind::Let {
				vars,
			} if index <= vars.len() => {
				let init = self.pop_expr()?;
				let slot = self.generate_slot();
				let stage = self.take_stage()?;
				self.set_stage(Box::new(ProjectStage::new(stage, vec![(slot, init)])))?;
				self.environment.insert(vars[index - 1].0, slot);
			}
			ExprKind::Filter {
				this,
			} => self.begin_filter(*this)?,
			_ => {}
		}
		Ok(())
	}

	fn post_visit(&mut self, expr: &Expression) -> Result<()> {
		match &expr.kind {
			ExprKind::Constant(value) => self.push_expr(EExpression::Constant(value.clone())),
			ExprKind::FieldPath(path) => self.compile_field_path(path),
			ExprKind::And | ExprKind::Or => {
				let logic = match expr.kind {
					ExprKind::And => Logic::And,
					_ => Logic::Or,
				};
				match expr.children.len() {
					0 => self.push_expr(EExpression::constant(matches!(logic, Logic::And))),
					1 => {
						let operand = self.pop_expr()?;
						let coerced = coerce_to_bool(self.frame_ids(), operand);
						self.push_expr(coerced)
					}
					_ => {
						self.finish_logic_branch(logic, true)?;
						self.combine_branches()
					}
				}
			}
			ExprKind::Cond => {
				self.finish_default_branch()?;
				self.combine_branches()
			}
			ExprKind::Switch {
				has_default,
			} => {
				if *has_default {
					self.finish_default_branch()?;
				} else {
					self.finish_case_then()?;
					let slot = self.generate_slot();
					let fail = EExpression::fail(
						4934200,
						"$switch could not find a matching branch for an input, and no default was specified.",
					);
					let stage = Box::new(ProjectStage::new(one_row(), vec![(slot, fail)]));
					self.branches()?.done.push((stage, slot));
				}
				self.combine_branches()
			}
			ExprKind::IfNull => {
				self.finish_if_null_branch(true)?;
				self.combine_branches()
			}
			ExprKind::Let {
				..
			} => {
				// The body is already the top expression
				for id in self.lets.pop().unwrap_or_default() {
					self.environment.remove(&id);
				}
				Ok(())
			}
			ExprKind::Filter {
				..
			} => self.finish_filter(),
			_ => leaf::build(self, expr),
		}
	}
}

impl ExpressionVisitorContext<'_> {
	/// Closes the frame of one `$and`/`$or` operand. Every operand but the last only passes
	/// when it decides the result.
	fn finish_logic_branch(&mut self, logic: Logic, last: bool) -> Result<()> {
		let (expr, stage) = self.pop_frame()?;
		let slot = self.generate_slot();
		let coerced = coerce_to_bool(self.frame_ids(), expr);
		let mut branch: BoxedStage = Box::new(ProjectStage::new(stage, vec![(slot, coerced)]));
		if !last {
			let decides = match logic {
				Logic::Or => EExpression::var(slot),
				Logic::And => EExpression::not(EExpression::var(slot)),
			};
			branch = Box::new(FilterStage::new(branch, decides));
		}
		self.branches()?.done.push((branch, slot));
		Ok(())
	}

	fn finish_case_guard(&mut self) -> Result<()> {
		let (expr, stage) = self.pop_frame()?;
		let slot = self.generate_slot();
		let coerced = coerce_to_bool(self.frame_ids(), expr);
		let guard = ProjectStage::new(stage, vec![(slot, coerced)]);
		let guard = Box::new(FilterStage::new(Box::new(guard), EExpression::var(slot)));
		self.branches()?.pending_case = Some(guard);
		Ok(())
	}

	fn finish_case_then(&mut self) -> Result<()> {
		let (expr, stage) = self.pop_frame()?;
		let slot = self.generate_slot();
		let then = Box::new(ProjectStage::new(stage, vec![(slot, expr)]));
		let branches = self.branches()?;
		let Some(guard) = branches.pending_case.take() else {
			bail!(Error::assertion(5611707, "a case result was compiled without its guard"));
		};
		branches.done.push((Box::new(LoopJoinStage::new(guard, then, None)), slot));
		Ok(())
	}

	fn finish_default_branch(&mut self) -> Result<()> {
		let (expr, stage) = self.pop_frame()?;
		let slot = self.generate_slot();
		let branch = Box::new(ProjectStage::new(stage, vec![(slot, expr)]));
		self.branches()?.done.push((branch, slot));
		Ok(())
	}

	fn finish_if_null_branch(&mut self, last: bool) -> Result<()> {
		let (expr, stage) = self.pop_frame()?;
		let slot = self.generate_slot();
		let mut branch: BoxedStage = Box::new(ProjectStage::new(stage, vec![(slot, expr)]));
		if !last {
			let present = EExpression::fill_empty(
				EExpression::type_match(EExpression::var(slot), !(mask::NULL | mask::UNDEFINED)),
				EExpression::constant(false),
			);
			branch = Box::new(FilterStage::new(branch, present));
		}
		self.branches()?.done.push((branch, slot));
		Ok(())
	}

	/// Attaches the union of the finished branches to the current stage
	fn combine_branches(&mut self) -> Result<()> {
		let Some(branches) = self.branches.pop() else {
			bail!(Error::assertion(5611704, "no multi-branch construct is being compiled"));
		};
		let out = self.generate_slot();
		let (stages, slots): (Vec<BoxedStage>, Vec<SlotId>) = branches.done.into_iter().unzip();
		let inputs = slots.into_iter().map(|slot| vec![slot]).collect();
		let union = UnionStage::new(stages, inputs, vec![out])?;
		let first = Box::new(LimitSkipStage::new(Box::new(union), Some(1), 0));
		let stage = self.take_stage()?;
		self.set_stage(Box::new(LoopJoinStage::new(stage, first, None)))?;
		self.push_expr(EExpression::var(out))
	}

	fn begin_filter(&mut self, this: crate::expr::VariableId) -> Result<()> {
		let input = self.pop_expr()?;
		let input_slot = self.generate_slot();
		let not_null_slot = self.generate_slot();
		let checked = super::helpers::local_bind(self.frame_ids(), vec![input], |refs| {
			let v = &refs[0];
			EExpression::if_then_else(
				EExpression::or(null_or_missing(v), EExpression::func("isArray", vec![v.clone()])),
				v.clone(),
				EExpression::fail(5073201, "input to $filter must be an array"),
			)
		});
		let not_null = EExpression::not(null_or_missing(&EExpression::var(input_slot)));
		let stage = self.take_stage()?;
		self.set_stage(Box::new(ProjectStage::new(stage, vec![(input_slot, checked), (not_null_slot, not_null)])))?;
		self.environment.insert(this, input_slot);
		self.filters.push(FilterInput {
			input_slot,
			not_null_slot,
			this,
		});
		self.push_frame();
		Ok(())
	}

	fn finish_filter(&mut self) -> Result<()> {
		let (predicate, stage) = self.pop_frame()?;
		let Some(filter) = self.filters.pop() else {
			bail!(Error::assertion(5611708, "no $filter input has been compiled"));
		};
		let coerced = coerce_to_bool(self.frame_ids(), predicate);
		let inner = FilterStage::constant(
			Box::new(FilterStage::new(stage, coerced)),
			EExpression::var(filter.not_null_slot),
		);
		let out = self.generate_slot();
		let outer = self.take_stage()?;
		let traverse =
			TraverseStage::new(outer, Box::new(inner), filter.input_slot, out, filter.input_slot, None, None, 1);
		self.set_stage(Box::new(traverse))?;
		self.environment.remove(&filter.this);
		self.push_expr(EExpression::fill_empty(EExpression::var(out), EExpression::null()))
	}

	fn compile_field_path(&mut self, path: &FieldPath) -> Result<()> {
		let (slot, expects_document) = match &path.root {
			PathRoot::Root | PathRoot::Current => (self.root_slot, true),
			PathRoot::Remove => return self.push_expr(EExpression::nothing()),
			PathRoot::System(name) => match self.state.env.get_slot_if_exists(name) {
				Some(slot) => (slot, false),
				None => bail!(Error::fail(5611301, format!("Builtin variable '$${name}' is not available"))),
			},
			PathRoot::User {
				id,
				name,
			} => match self.environment.get(id) {
				Some(slot) => (*slot, false),
				None => {
					bail!(Error::assertion(5611300, format!("Encountered unexpected variable '$${name}' (id {id})")))
				}
			},
		};
		if path.fields.is_empty() {
			return self.push_expr(EExpression::var(slot));
		}
		// The root document is never itself an array, so a single field is a plain lookup
		if expects_document && path.fields.len() == 1 {
			return self.push_expr(EExpression::func(
				"getField",
				vec![EExpression::var(slot), EExpression::string(&path.fields[0])],
			));
		}
		let stage = self.take_stage()?;
		let (stage, out) = if expects_document {
			self.traverse_path(stage, slot, &path.fields, 0)
		} else {
			let (inner, inner_out) = self.traverse_path(one_row(), slot, &path.fields, 0);
			let out = self.generate_slot();
			let stage: BoxedStage = Box::new(TraverseStage::new(stage, inner, slot, out, inner_out, None, None, 1));
			(stage, out)
		};
		self.set_stage(stage)?;
		self.push_expr(EExpression::var(out))
	}

	/// Resolves `fields[level..]` below the value in `input_slot`, descending into one level of
	/// array at every step
	fn traverse_path(&mut self, input: BoxedStage, input_slot: SlotId, fields: &[String], level: usize) -> (BoxedStage, SlotId) {
		let field_slot = self.generate_slot();
		let get = EExpression::func("getField", vec![EExpression::var(input_slot), EExpression::string(&fields[level])]);
		let stage = Box::new(ProjectStage::new(input, vec![(field_slot, get)]));
		let out = self.generate_slot();
		let inner: BoxedStage = if level + 1 == fields.len() {
			Box::new(ProjectStage::new(one_row(), vec![(out, EExpression::var(field_slot))]))
		} else {
			let (nested, nested_out) = self.traverse_path(one_row(), field_slot, fields, level + 1);
			Box::new(ProjectStage::new(nested, vec![(out, EExpression::var(nested_out))]))
		};
		(Box::new(TraverseStage::new(stage, inner, field_slot, out, out, None, None, 1)), out)
	}
}
