//! Virtual machine execution.
//!
//! A fetch-decode-execute loop over the current frame's content path.
//! Execution runs until the story ends or a choice block suspends it;
//! content accumulates in the output stream and the embedder drains it
//! line by line between runs.
//!
//! Stack pushes check the fixed maximum and underflow is reported, never
//! wrapped. A runtime fault leaves the story in a terminal state.

use rand::Rng;
use tracing::trace;

use ink_core::{Flags, InkError, Opcode};

use crate::error::StoryError;
use crate::object::{Obj, ObjRef, StrObj};
use crate::story::{Frame, PendingChoice, Story, CALL_STACK_MAX, STACK_MAX};

impl Story {
    /// Run until the story ends, faults, or suspends for a choice.
    pub(crate) fn run(&mut self) -> Result<(), StoryError> {
        let result = self.run_loop();

        if result.is_err() {
            // Faults are terminal.
            self.ended = true;
        }
        result
    }

    fn run_loop(&mut self) -> Result<(), StoryError> {
        while !self.ended && !self.awaiting_choice {
            if self.frames.is_empty() {
                self.ended = true;
                break;
            }
            self.step()?;
        }
        Ok(())
    }

    fn step(&mut self) -> Result<(), StoryError> {
        let fetched = {
            let frame = self.frames.last().expect("live frame");

            match self.heap.get(frame.path) {
                Obj::Path(path) => {
                    if frame.pc + 1 < path.code.len() {
                        Some((path.code[frame.pc], path.code[frame.pc + 1], frame.pc))
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };

        // Falling off the end of a path behaves as a return.
        let Some((op_byte, operand, offset)) = fetched else {
            return self.do_return();
        };

        self.frames.last_mut().expect("live frame").pc += 2;

        let opcode = Opcode::try_from(op_byte).map_err(InkError::InvalidInstruction)?;

        if self.flags.contains(Flags::VM_TRACING) {
            trace!(
                target: "ink_vm",
                pc = offset,
                op = opcode.name(),
                operand,
                stack = self.stack.len()
            );
        }

        match opcode {
            Opcode::Ret => self.do_return()?,
            Opcode::LoadConst => {
                let value = self.const_at(operand)?;
                self.push(value)?;
            }
            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::Dup => {
                let top = *self
                    .stack
                    .last()
                    .ok_or_else(|| underflow("DUP on empty stack"))?;
                self.push(top)?;
            }
            Opcode::True => {
                let value = self.bool_ref(true);
                self.push(value)?;
            }
            Opcode::False => {
                let value = self.bool_ref(false);
                self.push(value)?;
            }
            Opcode::Add => self.binary_number(|a, b| a + b)?,
            Opcode::Sub => self.binary_number(|a, b| a - b)?,
            Opcode::Mul => self.binary_number(|a, b| a * b)?,
            Opcode::Div => self.binary_number(|a, b| a / b)?,
            Opcode::Mod => self.binary_number(|a, b| a % b)?,
            Opcode::Neg => {
                let value = self.pop()?;
                let number = self
                    .heap
                    .number_value(value)
                    .ok_or_else(|| invalid("negation of a non-numeric value"))?;
                let result = self.alloc(Obj::Number(-number));
                self.push(result)?;
            }
            Opcode::Not => {
                let value = self.pop()?;
                let result = self.bool_ref(self.heap.is_falsey(value));
                self.push(result)?;
            }
            Opcode::And => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let result =
                    self.bool_ref(!self.heap.is_falsey(lhs) && !self.heap.is_falsey(rhs));
                self.push(result)?;
            }
            Opcode::Or => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let result =
                    self.bool_ref(!self.heap.is_falsey(lhs) || !self.heap.is_falsey(rhs));
                self.push(result)?;
            }
            Opcode::CmpEq => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let result = self.bool_ref(self.heap.value_eq(lhs, rhs));
                self.push(result)?;
            }
            Opcode::CmpLt => self.compare(|a, b| a < b)?,
            Opcode::CmpLte => self.compare(|a, b| a <= b)?,
            Opcode::CmpGt => self.compare(|a, b| a > b)?,
            Opcode::CmpGte => self.compare(|a, b| a >= b)?,
            Opcode::Br => {
                self.frames.last_mut().expect("live frame").pc += operand as usize;
            }
            Opcode::CondBr => {
                let value = self.pop()?;
                if self.heap.is_falsey(value) {
                    self.frames.last_mut().expect("live frame").pc += operand as usize;
                }
            }
            Opcode::LoadLocal => {
                let frame = self.frames.last().expect("live frame");
                let value = frame
                    .locals
                    .get(operand as usize)
                    .copied()
                    .flatten()
                    .ok_or_else(|| invalid("read of an unset local slot"))?;
                self.push(value)?;
            }
            Opcode::StoreLocal => {
                let value = self.pop()?;
                let frame = self.frames.last_mut().expect("live frame");
                let slot = frame
                    .locals
                    .get_mut(operand as usize)
                    .ok_or_else(|| invalid("local slot out of range"))?;
                *slot = Some(value);
            }
            Opcode::LoadGlobal => {
                let name = self.const_at(operand)?;
                let globals = self.globals.expect("loaded story has globals");
                let value = self.heap.table_get(globals, name).ok_or_else(|| {
                    invalid(&format!(
                        "read of unset variable '{}'",
                        self.heap.str_text(name)
                    ))
                })?;
                self.push(value)?;
            }
            Opcode::StoreGlobal => {
                let value = self.pop()?;
                let name = self.const_at(operand)?;
                let globals = self.globals.expect("loaded story has globals");
                self.heap.table_insert(globals, name, value);
            }
            Opcode::ContentPush => {
                let value = self.pop()?;
                let text = self.heap.display_value(value);
                self.output.write_str(&text);
                self.line_open = true;
            }
            Opcode::Glue => {
                self.output.trim();
                self.glue = true;
            }
            Opcode::Done => self.handle_done(),
            Opcode::End => {
                self.ended = true;
            }
            Opcode::Call => self.call_path(operand)?,
            Opcode::Divert => self.divert_path(operand)?,
            Opcode::Choice => self.emit_choice(operand, offset, false)?,
            Opcode::ChoiceSticky => self.emit_choice(operand, offset, true)?,
            Opcode::SeqStop | Opcode::SeqCycle | Opcode::SeqShuffle | Opcode::SeqOnce => {
                self.run_sequence(opcode, operand as usize, offset)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Stack
    // ------------------------------------------------------------------

    fn push(&mut self, value: ObjRef) -> Result<(), StoryError> {
        if self.stack.len() >= STACK_MAX {
            return Err(StoryError::Runtime(InkError::StackOverflow));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<ObjRef, StoryError> {
        self.stack
            .pop()
            .ok_or_else(|| underflow("pop from empty stack"))
    }

    fn bool_ref(&self, value: bool) -> ObjRef {
        if value {
            self.true_ref.expect("booleans interned at load")
        } else {
            self.false_ref.expect("booleans interned at load")
        }
    }

    fn const_at(&self, operand: u8) -> Result<ObjRef, StoryError> {
        let frame = self.frames.last().expect("live frame");

        match self.heap.get(frame.path) {
            Obj::Path(path) => path
                .consts
                .get(operand as usize)
                .copied()
                .ok_or_else(|| invalid("constant index out of range")),
            _ => Err(invalid("executing a non-path object")),
        }
    }

    fn binary_number(&mut self, op: impl Fn(f64, f64) -> f64) -> Result<(), StoryError> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let (Some(a), Some(b)) = (self.heap.number_value(lhs), self.heap.number_value(rhs))
        else {
            return Err(invalid("arithmetic on a non-numeric value"));
        };

        let result = self.alloc(Obj::Number(op(a, b)));
        self.push(result)
    }

    fn compare(&mut self, op: impl Fn(f64, f64) -> bool) -> Result<(), StoryError> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let (Some(a), Some(b)) = (self.heap.number_value(lhs), self.heap.number_value(rhs))
        else {
            return Err(invalid("comparison of a non-numeric value"));
        };

        let result = self.bool_ref(op(a, b));
        self.push(result)
    }

    // ------------------------------------------------------------------
    // Control transfer
    // ------------------------------------------------------------------

    fn do_return(&mut self) -> Result<(), StoryError> {
        let frame = self.frames.pop().expect("return with no frame");
        let is_function = matches!(self.heap.get(frame.path), Obj::Path(p) if p.is_function);

        if is_function {
            // A function's value flows to the caller; a body with no
            // explicit return yields empty content.
            let value = if self.stack.len() > frame.stack_base {
                self.stack.pop().expect("checked above")
            } else {
                self.alloc(Obj::Str(StrObj::new("")))
            };

            self.stack.truncate(frame.stack_base);
            self.push(value)?;
        } else {
            self.stack.truncate(frame.stack_base);
        }

        if self.frames.is_empty() {
            self.ended = true;
        }
        Ok(())
    }

    fn target_path(&self, operand: u8) -> Result<(ObjRef, usize, usize), StoryError> {
        let target = self.const_at(operand)?;

        match self.heap.get(target) {
            Obj::Path(path) => Ok((target, path.arity as usize, path.locals as usize)),
            _ => Err(invalid("transfer target is not a content path")),
        }
    }

    fn pop_args(&mut self, arity: usize, locals: usize) -> Result<Vec<Option<ObjRef>>, StoryError> {
        let mut slots = vec![None; locals.max(arity)];

        for slot in (0..arity).rev() {
            slots[slot] = Some(self.pop()?);
        }
        Ok(slots)
    }

    fn call_path(&mut self, operand: u8) -> Result<(), StoryError> {
        if self.frames.len() >= CALL_STACK_MAX {
            return Err(StoryError::Runtime(InkError::StackOverflow));
        }

        let (target, arity, locals) = self.target_path(operand)?;
        let slots = self.pop_args(arity, locals)?;
        let stack_base = self.stack.len();

        self.frames.push(Frame {
            path: target,
            pc: 0,
            stack_base,
            locals: slots,
        });
        Ok(())
    }

    /// A divert reuses the current frame: one-way transfer.
    fn divert_path(&mut self, operand: u8) -> Result<(), StoryError> {
        let (target, arity, locals) = self.target_path(operand)?;
        let slots = self.pop_args(arity, locals)?;
        let frame = self.frames.last_mut().expect("live frame");

        frame.path = target;
        frame.pc = 0;
        frame.locals = slots;

        let base = frame.stack_base;
        self.stack.truncate(base);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Content and choices
    // ------------------------------------------------------------------

    fn handle_done(&mut self) {
        if self.line_open {
            if self.glue {
                self.glue = false;
            } else {
                self.output.write_str("\n");
            }
            self.line_open = false;
        } else if self.glue {
            self.glue = false;
        }

        if !self.choices.is_empty() {
            self.awaiting_choice = true;
        }
    }

    fn emit_choice(
        &mut self,
        operand: u8,
        offset: usize,
        sticky: bool,
    ) -> Result<(), StoryError> {
        let text = self.pop()?;
        let target_ref = self.const_at(operand)?;
        let target = self
            .heap
            .number_value(target_ref)
            .ok_or_else(|| invalid("choice target is not an offset"))? as usize;
        let path = self.frames.last().expect("live frame").path;

        // Once-only options stay hidden after they were taken.
        if !sticky && self.seen_choices.contains(&(path, offset)) {
            return Ok(());
        }

        self.heap.own(text);
        let id = self.alloc(Obj::Number(self.next_choice_id));
        self.heap.disown(text);
        self.next_choice_id += 1.0;

        self.choices.push(PendingChoice {
            id,
            text,
            target,
            offset,
            sticky,
        });
        Ok(())
    }

    fn run_sequence(
        &mut self,
        opcode: Opcode,
        count: usize,
        offset: usize,
    ) -> Result<(), StoryError> {
        let path = self.frames.last().expect("live frame").path;
        let counter = self.seq_counters.entry((path, offset)).or_insert(0);
        let visits = *counter as usize;
        *counter += 1;

        let selected = if count == 0 {
            0
        } else {
            match opcode {
                Opcode::SeqStop => visits.min(count - 1),
                Opcode::SeqCycle => visits % count,
                Opcode::SeqShuffle => rand::thread_rng().gen_range(0..count),
                // Past the last alternative the selector matches nothing.
                Opcode::SeqOnce => visits.min(count),
                _ => unreachable!("not a sequence opcode"),
            }
        };

        let value = self.alloc(Obj::Number(selected as f64));
        self.push(value)
    }
}

fn invalid(what: &str) -> StoryError {
    StoryError::Runtime(InkError::InvalidArgument(what.to_string()))
}

fn underflow(what: &str) -> StoryError {
    StoryError::Runtime(InkError::InvalidArgument(what.to_string()))
}
