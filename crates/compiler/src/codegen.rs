//! Bytecode generation.
//!
//! Linearizes the IR into `(opcode, operand)` byte pairs per content path
//! and interns constants into each path's pool. Branches are resolved with
//! a two-pass scheme: forward jumps are emitted with a placeholder operand
//! and patched once the target offset is known. A target outside the
//! one-byte relative range is a fatal error, as is a pool past 256
//! entries.
//!
//! Choice targets are absolute offsets smuggled through number constants;
//! those pool slots are patched after the choice bodies are placed and are
//! exempt from constant deduplication.

use std::collections::HashSet;

use ink_core::{Const, InkError, Opcode, PathCode, Program};

use crate::ir::{CallMode, Ir, IrOp, SeqId, SeqPolicy};

/// Generate a compiled program from lowered IR.
pub fn generate(ir: &Ir) -> Result<Program, InkError> {
    let mut program = Program::default();

    for &decl in &ir.decls {
        let IrOp::Declaration {
            name,
            body,
            arity,
            locals,
            is_function,
            ..
        } = ir.inst(decl)
        else {
            continue;
        };

        let mut gen = PathGen::new(ir, ir.string_at(*name));
        gen.path.arity = *arity;
        gen.path.locals = *locals;
        gen.path.is_function = *is_function;

        gen.emit_seq(*body)?;
        gen.emit(Opcode::Ret, 0);

        program.paths.push(gen.path);
    }

    program.root = 0;
    Ok(program)
}

struct PathGen<'a> {
    ir: &'a Ir,
    path: PathCode,
    /// Constant slots excluded from deduplication (patchable targets).
    pinned: HashSet<usize>,
}

impl<'a> PathGen<'a> {
    fn new(ir: &'a Ir, name: &str) -> PathGen<'a> {
        PathGen {
            ir,
            path: PathCode::new(name),
            pinned: HashSet::new(),
        }
    }

    fn emit(&mut self, opcode: Opcode, operand: u8) {
        self.path.code.push(opcode as u8);
        self.path.code.push(operand);
    }

    /// Intern a constant, reusing an existing equal entry.
    fn intern(&mut self, constant: Const) -> Result<u8, InkError> {
        let found = self
            .path
            .consts
            .iter()
            .enumerate()
            .find(|(i, existing)| !self.pinned.contains(i) && **existing == constant);

        if let Some((index, _)) = found {
            return Ok(index as u8);
        }
        self.push_const(constant, false)
    }

    /// Append a constant without deduplication.
    fn push_const(&mut self, constant: Const, pinned: bool) -> Result<u8, InkError> {
        let index = self.path.consts.len();

        if index > u8::MAX as usize {
            return Err(InkError::ConstPoolFull(self.path.name.clone()));
        }
        if pinned {
            self.pinned.insert(index);
        }
        self.path.consts.push(constant);
        Ok(index as u8)
    }

    fn operand_u8(&self, value: u32, what: &str) -> Result<u8, InkError> {
        u8::try_from(value)
            .map_err(|_| InkError::InvalidArgument(format!("{} out of operand range", what)))
    }

    /// Emit a branch with a placeholder operand; returns the operand's
    /// byte index for patching.
    fn emit_branch(&mut self, opcode: Opcode) -> usize {
        self.emit(opcode, 0);
        self.path.code.len() - 1
    }

    /// Patch a branch operand to jump to the current end of code.
    fn patch_branch(&mut self, operand_index: usize) -> Result<(), InkError> {
        let offset = self.path.code.len() - (operand_index + 1);

        match u8::try_from(offset) {
            Ok(byte) => {
                self.path.code[operand_index] = byte;
                Ok(())
            }
            Err(_) => Err(InkError::BranchRange(offset)),
        }
    }

    fn emit_seq(&mut self, seq: SeqId) -> Result<(), InkError> {
        let insts = self.ir.seq(seq).insts.clone();

        for index in insts {
            self.emit_inst(index)?;
        }
        Ok(())
    }

    fn emit_inst(&mut self, index: u32) -> Result<(), InkError> {
        match self.ir.inst(index).clone() {
            // Locals are preallocated by the frame.
            IrOp::Alloc { .. } => {}
            IrOp::Number { value } => {
                let slot = self.intern(Const::Number(value))?;
                self.emit(Opcode::LoadConst, slot);
            }
            IrOp::Str { offset } => {
                let text = self.ir.string_at(offset).to_string();
                let slot = self.intern(Const::Str(text))?;
                self.emit(Opcode::LoadConst, slot);
            }
            IrOp::True => self.emit(Opcode::True, 0),
            IrOp::False => self.emit(Opcode::False, 0),
            IrOp::LoadLocal { slot } => {
                let slot = self.operand_u8(slot, "local slot")?;
                self.emit(Opcode::LoadLocal, slot);
            }
            IrOp::StoreLocal { slot, .. } => {
                let slot = self.operand_u8(slot, "local slot")?;
                self.emit(Opcode::StoreLocal, slot);
            }
            IrOp::LoadGlobal { name } => {
                let text = self.ir.string_at(name).to_string();
                let slot = self.intern(Const::Str(text))?;
                self.emit(Opcode::LoadGlobal, slot);
            }
            IrOp::StoreGlobal { name, .. } => {
                let text = self.ir.string_at(name).to_string();
                let slot = self.intern(Const::Str(text))?;
                self.emit(Opcode::StoreGlobal, slot);
            }
            IrOp::Add { .. } => self.emit(Opcode::Add, 0),
            IrOp::Sub { .. } => self.emit(Opcode::Sub, 0),
            IrOp::Mul { .. } => self.emit(Opcode::Mul, 0),
            IrOp::Div { .. } => self.emit(Opcode::Div, 0),
            IrOp::Mod { .. } => self.emit(Opcode::Mod, 0),
            IrOp::Neg { .. } => self.emit(Opcode::Neg, 0),
            IrOp::BoolNot { .. } => self.emit(Opcode::Not, 0),
            IrOp::And { .. } => self.emit(Opcode::And, 0),
            IrOp::Or { .. } => self.emit(Opcode::Or, 0),
            IrOp::CmpEq { .. } => self.emit(Opcode::CmpEq, 0),
            IrOp::CmpNeq { .. } => {
                // Inequality is equality plus negation.
                self.emit(Opcode::CmpEq, 0);
                self.emit(Opcode::Not, 0);
            }
            IrOp::CmpLt { .. } => self.emit(Opcode::CmpLt, 0),
            IrOp::CmpLte { .. } => self.emit(Opcode::CmpLte, 0),
            IrOp::CmpGt { .. } => self.emit(Opcode::CmpGt, 0),
            IrOp::CmpGte { .. } => self.emit(Opcode::CmpGte, 0),
            IrOp::Pop { .. } => self.emit(Opcode::Pop, 0),
            IrOp::ContentPush { .. } => self.emit(Opcode::ContentPush, 0),
            IrOp::Glue => self.emit(Opcode::Glue, 0),
            IrOp::Done => self.emit(Opcode::Done, 0),
            IrOp::End => self.emit(Opcode::End, 0),
            IrOp::Ret { .. } => self.emit(Opcode::Ret, 0),
            IrOp::Block { seq } => self.emit_seq(seq)?,
            IrOp::CondBr {
                then_seq,
                else_seq,
                ..
            } => self.emit_condbr(then_seq, else_seq)?,
            IrOp::Switch {
                cases, default, ..
            } => self.emit_switch(cases, default)?,
            IrOp::SwitchCase { .. } => {
                // Only valid inside a Switch payload.
                return Err(InkError::InvalidArgument(
                    "switch case outside switch".to_string(),
                ));
            }
            IrOp::Call { mode, path, .. } => {
                let slot = self.intern(Const::Path(path))?;
                let opcode = match mode {
                    CallMode::Divert => Opcode::Divert,
                    CallMode::Call | CallMode::Tunnel | CallMode::Thread => Opcode::Call,
                };
                self.emit(opcode, slot);
            }
            IrOp::Choice { .. } => {
                return Err(InkError::InvalidArgument(
                    "choice outside choice list".to_string(),
                ));
            }
            IrOp::ChoiceList { choices, gather } => self.emit_choice_list(choices, gather)?,
            IrOp::Sequence { policy, alts } => self.emit_sequence(policy, alts)?,
            IrOp::Declaration { .. } => {
                return Err(InkError::InvalidArgument(
                    "nested declaration".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn emit_condbr(&mut self, then_seq: SeqId, else_seq: Option<SeqId>) -> Result<(), InkError> {
        let cond_branch = self.emit_branch(Opcode::CondBr);

        self.emit_seq(then_seq)?;

        match else_seq {
            Some(else_seq) => {
                let exit_branch = self.emit_branch(Opcode::Br);

                self.patch_branch(cond_branch)?;
                self.emit_seq(else_seq)?;
                self.patch_branch(exit_branch)?;
            }
            None => self.patch_branch(cond_branch)?,
        }
        Ok(())
    }

    fn emit_switch(&mut self, cases: SeqId, default: Option<SeqId>) -> Result<(), InkError> {
        let case_insts = self.ir.seq(cases).insts.clone();
        let mut exits = Vec::new();

        for case_index in case_insts {
            let IrOp::SwitchCase { value_seq, body } = self.ir.inst(case_index).clone() else {
                continue;
            };

            self.emit(Opcode::Dup, 0);
            self.emit_seq(value_seq)?;
            self.emit(Opcode::CmpEq, 0);
            let next = self.emit_branch(Opcode::CondBr);

            self.emit(Opcode::Pop, 0);
            self.emit_seq(body)?;
            exits.push(self.emit_branch(Opcode::Br));

            self.patch_branch(next)?;
        }

        // No case matched: drop the scrutinee.
        self.emit(Opcode::Pop, 0);
        if let Some(default) = default {
            self.emit_seq(default)?;
        }

        for exit in exits {
            self.patch_branch(exit)?;
        }
        Ok(())
    }

    fn emit_choice_list(
        &mut self,
        choices: SeqId,
        gather: Option<SeqId>,
    ) -> Result<(), InkError> {
        let choice_insts = self.ir.seq(choices).insts.clone();
        let mut bodies = Vec::new();

        for choice_index in choice_insts {
            let IrOp::Choice { text, sticky, body } = self.ir.inst(choice_index).clone() else {
                continue;
            };

            let menu = self.ir.string_at(text).to_string();
            let text_slot = self.intern(Const::Str(menu))?;
            self.emit(Opcode::LoadConst, text_slot);

            let target_slot = self.push_const(Const::Number(0.0), true)?;
            let opcode = if sticky {
                Opcode::ChoiceSticky
            } else {
                Opcode::Choice
            };
            self.emit(opcode, target_slot);

            bodies.push((target_slot, body));
        }

        self.emit(Opcode::Done, 0);

        // Executed only when every option was suppressed.
        let empty_exit = self.emit_branch(Opcode::Br);
        let mut exits = Vec::new();

        for (target_slot, body) in bodies {
            let offset = self.path.code.len();
            self.path.consts[target_slot as usize] = Const::Number(offset as f64);

            self.emit_seq(body)?;
            exits.push(self.emit_branch(Opcode::Br));
        }

        self.patch_branch(empty_exit)?;
        for exit in exits {
            self.patch_branch(exit)?;
        }
        if let Some(gather) = gather {
            self.emit_seq(gather)?;
        }
        Ok(())
    }

    fn emit_sequence(&mut self, policy: SeqPolicy, alts: SeqId) -> Result<(), InkError> {
        let alt_insts = self.ir.seq(alts).insts.clone();
        let count = self.operand_u8(alt_insts.len() as u32, "sequence alternatives")?;
        let opcode = match policy {
            SeqPolicy::Stopping => Opcode::SeqStop,
            SeqPolicy::Cycle => Opcode::SeqCycle,
            SeqPolicy::Shuffle => Opcode::SeqShuffle,
            SeqPolicy::Once => Opcode::SeqOnce,
        };

        self.emit(opcode, count);

        let mut exits = Vec::new();

        for (ordinal, alt_index) in alt_insts.iter().enumerate() {
            let IrOp::Block { seq } = self.ir.inst(*alt_index).clone() else {
                continue;
            };

            self.emit(Opcode::Dup, 0);
            let slot = self.intern(Const::Number(ordinal as f64))?;
            self.emit(Opcode::LoadConst, slot);
            self.emit(Opcode::CmpEq, 0);
            let next = self.emit_branch(Opcode::CondBr);

            self.emit(Opcode::Pop, 0);
            self.emit_seq(seq)?;
            exits.push(self.emit_branch(Opcode::Br));

            self.patch_branch(next)?;
        }

        // Selector matched nothing (a spent `once` sequence).
        self.emit(Opcode::Pop, 0);
        for exit in exits {
            self.patch_branch(exit)?;
        }
        Ok(())
    }
}
