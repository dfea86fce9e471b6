use log::debug;
use smallvec::SmallVec;

use crate::ir::{self, Builder, Imm, Inst, Relop, Type, Value};
use crate::wasm::module::{BlockType, CompareOp, FuncType, Module, Op, ValueType};
use crate::wasm::scan::{scan, LowerTask, ScannedModule};
use crate::wasm::stack::{
    BlockFrame, BlockStack, FrameKind, OperandEntry, OperandStack, ResultPhi,
};
use crate::Error;

/// Lowers a Wasm module into an IR module.
///
/// Scans the top-level definitions first, then lowers every defined
/// function in document order. Any error aborts the whole lowering.
pub fn lower(module: &Module) -> Result<ir::Module, Error> {
    let mut builder = Builder::new("main");
    let scanned = scan(module, &mut builder)?;
    for task in &scanned.functions {
        FunctionLowerer::new(&mut builder, &scanned).lower(task)?;
    }
    Ok(builder.finish())
}

/// A local slot: its IR type and the address of its stack allocation.
#[derive(Copy, Clone, Debug)]
struct LocalSlot {
    ty: Type,
    addr: Value,
}

/// Translates one Wasm function body into IR.
///
/// Owns the operand and block stacks for the duration of a single
/// function; both are discarded afterwards.
struct FunctionLowerer<'a, 'm> {
    builder: &'a mut Builder,
    scanned: &'a ScannedModule<'m>,
    stack: OperandStack,
    frames: BlockStack,
    locals: Vec<LocalSlot>,
}

impl<'a, 'm> FunctionLowerer<'a, 'm> {
    fn new(builder: &'a mut Builder, scanned: &'a ScannedModule<'m>) -> Self {
        Self {
            builder,
            scanned,
            stack: OperandStack::default(),
            frames: BlockStack::default(),
            locals: Vec::new(),
        }
    }

    fn lower(mut self, task: &LowerTask<'m>) -> Result<(), Error> {
        debug!("lowering wasm function {}", task.name);
        let function = match task.ty.results.as_slice() {
            [] => self.builder.new_procedure(&task.name),
            [result] => self.builder.new_function(&task.name, result.ir_type()),
            results => {
                return Err(Error::UnsupportedWasm(format!(
                    "{} return values",
                    results.len()
                )))
            }
        };
        self.builder.set_function(function);
        let entry = self.builder.new_block();
        self.builder.func_mut().entry = Some(entry);
        self.builder.set_block(entry);

        // The first locals are the function parameters, spilled into their
        // own slots so that set_local works uniformly on them.
        for (index, (_, ty)) in task.ty.params.iter().enumerate() {
            let ir_ty = ty.ir_type();
            let parameter = self.builder.emit_value(Inst::Parameter {
                name: format!("param{index}"),
                ty: ir_ty,
            });
            self.builder.func_mut().parameters.push(parameter);
            let addr = self.new_local_slot(ir_ty);
            self.builder.emit(Inst::Store {
                value: parameter,
                addr,
            });
        }
        // Declared locals follow; Alloc zero-initializes, so no store.
        for (_, ty) in &task.func.locals {
            self.new_local_slot(ty.ir_type());
        }

        let total = task.func.body.len();
        for (nr, op) in task.func.body.iter().enumerate() {
            debug!("{}/{} {:?}", nr + 1, total, op);
            self.lower_op(op)?;
        }

        // Close the fall-through exit of the function body.
        let current = self.builder.current_block();
        let block = self.builder.func().block(current);
        if !block.is_empty() && !block.is_closed() {
            if self.builder.func().is_procedure() {
                self.builder.emit(Inst::Exit);
            } else {
                let value = self.pop_value()?;
                self.builder.emit(Inst::Return { value });
            }
        }
        self.builder.func_mut().delete_unreachable();
        Ok(())
    }

    fn lower_op(&mut self, op: &Op) -> Result<(), Error> {
        match op {
            Op::Binary { ty, op } => {
                let rhs = self.pop_value()?;
                let lhs = self.pop_value()?;
                let value = self.builder.emit_value(Inst::Binop {
                    lhs,
                    op: op.ir_op(),
                    rhs,
                    ty: ty.ir_type(),
                });
                self.stack.push_value(value);
            }
            Op::Compare { ty, op } => {
                let (lhs, rhs) = if *op == CompareOp::Eqz {
                    let zero = self.builder.emit_value(Inst::Const {
                        imm: zero_imm(*ty),
                        ty: ty.ir_type(),
                    });
                    (self.pop_value()?, zero)
                } else {
                    let rhs = self.pop_value()?;
                    (self.pop_value()?, rhs)
                };
                // Deferred: materializes only if used as a plain value.
                self.stack.push(OperandEntry::Compare {
                    op: op.relop(),
                    lhs,
                    rhs,
                });
            }
            Op::Load { ty, offset, .. } => {
                let addr = self.effective_address(*offset)?;
                let value = self.builder.emit_value(Inst::Load {
                    addr,
                    ty: ty.ir_type(),
                });
                self.stack.push_value(value);
            }
            Op::Store { offset, .. } => {
                let value = self.pop_value()?;
                let addr = self.effective_address(*offset)?;
                self.builder.emit(Inst::Store { value, addr });
            }
            Op::Cast(cast) => {
                let operand = self.pop_value()?;
                let value = self.builder.emit_value(Inst::Cast {
                    operand,
                    ty: cast.target_type(),
                });
                self.stack.push_value(value);
            }
            Op::Const(constant) => {
                let value = self.builder.emit_value(Inst::Const {
                    imm: constant.imm(),
                    ty: constant.ty().ir_type(),
                });
                self.stack.push_value(value);
            }
            Op::Floor(ty) => {
                // Round toward zero through the integer domain.
                let operand = self.pop_value()?;
                let truncated = self.builder.emit_value(Inst::Cast {
                    operand,
                    ty: Type::I64,
                });
                let value = self.builder.emit_value(Inst::Cast {
                    operand: truncated,
                    ty: ty.ir_type(),
                });
                self.stack.push_value(value);
            }
            Op::Neg(ty) => {
                let operand = self.pop_value()?;
                let value = self.builder.emit_value(Inst::Unop {
                    op: ir::UnOp::Neg,
                    operand,
                    ty: ty.ir_type(),
                });
                self.stack.push_value(value);
            }
            Op::Sqrt(ty) => {
                return Err(Error::UnsupportedWasm(format!("{ty}.sqrt")));
            }
            Op::LocalGet(index) => {
                let slot = self.local(*index)?;
                let value = self.builder.emit_value(Inst::Load {
                    addr: slot.addr,
                    ty: slot.ty,
                });
                self.stack.push_value(value);
            }
            Op::LocalSet(index) => {
                let value = self.pop_value()?;
                let slot = self.local(*index)?;
                self.check_slot_type(slot.ty, value)?;
                self.builder.emit(Inst::Store {
                    value,
                    addr: slot.addr,
                });
            }
            Op::LocalTee(index) => {
                let value = self.pop_value()?;
                let slot = self.local(*index)?;
                self.check_slot_type(slot.ty, value)?;
                self.builder.emit(Inst::Store {
                    value,
                    addr: slot.addr,
                });
                // The pre-store value stays on the stack, not a re-load.
                self.stack.push_value(value);
            }
            Op::GlobalGet(id) => {
                let slot = self.scanned.global(id)?;
                let addr = self.builder.emit_value(Inst::VariableAddr { var: slot.var });
                let value = self.builder.emit_value(Inst::Load { addr, ty: slot.ty });
                self.stack.push_value(value);
            }
            Op::GlobalSet(id) => {
                let value = self.pop_value()?;
                let slot = self.scanned.global(id)?;
                self.check_slot_type(slot.ty, value)?;
                let addr = self.builder.emit_value(Inst::VariableAddr { var: slot.var });
                self.builder.emit(Inst::Store { value, addr });
            }
            Op::Block(block_type) => self.enter_region(FrameKind::Block, *block_type),
            Op::Loop(block_type) => self.enter_region(FrameKind::Loop, *block_type),
            Op::If(block_type) => {
                let (op, lhs, rhs) = self.pop_condition()?;
                let true_block = self.builder.new_block();
                let continue_block = self.builder.new_block();
                self.builder.emit(Inst::CJump {
                    lhs,
                    op,
                    rhs,
                    then_dst: true_block,
                    else_dst: continue_block,
                });
                self.builder.set_block(true_block);
                self.frames.push(BlockFrame {
                    kind: FrameKind::If,
                    continue_block,
                    inner_block: None,
                    result: result_phi(*block_type),
                });
            }
            Op::Else => {
                let mut frame = self.frames.pop()?;
                if frame.kind != FrameKind::If {
                    return Err(Error::UnsupportedWasm("else outside of if".to_string()));
                }
                // The if frame's continuation doubles as the else entry;
                // the region continues behind a fresh block.
                let else_entry = frame.continue_block;
                let continue_block = self.builder.new_block();
                self.fill_phi(&mut frame.result)?;
                self.builder.emit(Inst::Jump {
                    target: continue_block,
                });
                self.builder.set_block(else_entry);
                self.frames.push(BlockFrame {
                    kind: FrameKind::Else,
                    continue_block,
                    inner_block: frame.inner_block,
                    result: frame.result,
                });
            }
            Op::End => {
                let mut frame = self.frames.pop()?;
                self.fill_phi(&mut frame.result)?;
                self.builder.emit(Inst::Jump {
                    target: frame.continue_block,
                });
                self.builder.set_block(frame.continue_block);
                if let Some(phi) = frame.result {
                    let value = self.builder.emit_value(Inst::Phi {
                        ty: phi.ty,
                        incoming: phi.incoming.into_vec(),
                    });
                    self.stack.push_value(value);
                }
            }
            Op::Br(depth) => {
                let frame = self.frames.nth_from_top(*depth)?;
                let kind = frame.kind;
                let target = frame.branch_target();
                if kind != FrameKind::Loop {
                    self.fill_frame_result(*depth)?;
                }
                self.builder.emit(Inst::Jump { target });
                // Anything after an unconditional branch is unreachable.
                let unreachable = self.builder.new_block();
                self.builder.set_block(unreachable);
            }
            Op::BrIf(depth) => {
                let (op, lhs, rhs) = self.pop_condition()?;
                let frame = self.frames.nth_from_top(*depth)?;
                let kind = frame.kind;
                let target = frame.branch_target();
                if kind != FrameKind::Loop {
                    // A conditional branch carries the region result too;
                    // the fall-through path keeps the value.
                    self.fill_frame_result(*depth)?;
                }
                let fall_through = self.builder.new_block();
                self.builder.emit(Inst::CJump {
                    lhs,
                    op,
                    rhs,
                    then_dst: target,
                    else_dst: fall_through,
                });
                self.builder.set_block(fall_through);
            }
            Op::Call(id) => {
                let (name, signature) = self.scanned.callable(id)?.clone();
                let args = self.pop_args(signature)?;
                self.emit_call(
                    signature,
                    |ty| Inst::FunctionCall {
                        callee: name.clone(),
                        args: args.clone(),
                        ty,
                    },
                    || Inst::ProcedureCall {
                        callee: name.clone(),
                        args: args.clone(),
                    },
                )?;
            }
            Op::CallIndirect(type_id) => {
                let signature = self.scanned.signature(type_id)?;
                let mut callee = self.pop_value()?;
                if self.value_type(callee) != Type::Ptr {
                    callee = self.builder.emit_value(Inst::Cast {
                        operand: callee,
                        ty: Type::Ptr,
                    });
                }
                let args = self.pop_args(signature)?;
                self.emit_call(
                    signature,
                    |ty| Inst::FunctionPointerCall {
                        callee,
                        args: args.clone(),
                        ty,
                    },
                    || Inst::ProcedurePointerCall {
                        callee,
                        args: args.clone(),
                    },
                )?;
            }
            Op::Return => {
                if self.builder.func().is_procedure() {
                    self.builder.emit(Inst::Exit);
                } else {
                    let value = self.pop_value()?;
                    self.builder.emit(Inst::Return { value });
                }
                let after = self.builder.new_block();
                self.builder.set_block(after);
            }
            Op::Select => {
                let (op, lhs, rhs) = self.pop_condition()?;
                // The value pushed second sits on top and is the one taken
                // when the condition is zero.
                let nein_value = self.pop_value()?;
                let ja_value = self.pop_value()?;
                let ja_block = self.builder.new_block();
                let nein_block = self.builder.new_block();
                let join = self.builder.new_block();
                self.builder.emit(Inst::CJump {
                    lhs,
                    op,
                    rhs,
                    then_dst: ja_block,
                    else_dst: nein_block,
                });
                self.builder.set_block(ja_block);
                self.builder.emit(Inst::Jump { target: join });
                self.builder.set_block(nein_block);
                self.builder.emit(Inst::Jump { target: join });
                self.builder.set_block(join);
                let ty = self.value_type(ja_value);
                let value = self.builder.emit_value(Inst::Phi {
                    ty,
                    incoming: vec![(ja_block, ja_value), (nein_block, nein_value)],
                });
                self.stack.push_value(value);
            }
            Op::Drop => {
                self.pop_value()?;
            }
            Op::Unreachable => {
                // No trap lowering in the core.
            }
        }
        Ok(())
    }

    /// Opens a `block` or `loop` region.
    fn enter_region(&mut self, kind: FrameKind, block_type: BlockType) {
        let result = result_phi(block_type);
        let inner_block = self.builder.new_block();
        let continue_block = self.builder.new_block();
        self.builder.emit(Inst::Jump {
            target: inner_block,
        });
        self.builder.set_block(inner_block);
        self.frames.push(BlockFrame {
            kind,
            continue_block,
            inner_block: Some(inner_block),
            result,
        });
    }

    /// Emits a call instruction, pushing the result for non-void callees.
    fn emit_call(
        &mut self,
        signature: &FuncType,
        function_inst: impl FnOnce(Type) -> Inst,
        procedure_inst: impl FnOnce() -> Inst,
    ) -> Result<(), Error> {
        match signature.results.as_slice() {
            [] => {
                self.builder.emit(procedure_inst());
            }
            [result] => {
                let value = self.builder.emit_value(function_inst(result.ir_type()));
                self.stack.push_value(value);
            }
            results => {
                return Err(Error::UnsupportedWasm(format!(
                    "{} return values",
                    results.len()
                )))
            }
        }
        Ok(())
    }

    /// Pops the callee's arguments and restores their source order.
    ///
    /// Wasm pushes arguments left to right, so the last argument is on
    /// top; popping yields them reversed.
    fn pop_args(&mut self, signature: &FuncType) -> Result<Vec<Value>, Error> {
        let mut args: SmallVec<[Value; 4]> = SmallVec::with_capacity(signature.params.len());
        for _ in &signature.params {
            args.push(self.pop_value()?);
        }
        args.reverse();
        Ok(args.into_vec())
    }

    /// Allocates a slot for a parameter or declared local and records it.
    fn new_local_slot(&mut self, ty: Type) -> Value {
        let size = ty.size();
        let alloc = self.builder.emit_value(Inst::Alloc { size, align: size });
        let addr = self.builder.emit_value(Inst::AddressOf { alloc });
        self.locals.push(LocalSlot { ty, addr });
        addr
    }

    fn local(&self, index: u32) -> Result<LocalSlot, Error> {
        self.locals.get(index as usize).copied().ok_or_else(|| {
            Error::UnsupportedWasm(format!("local index {index} out of range"))
        })
    }

    fn check_slot_type(&self, expected: Type, value: Value) -> Result<(), Error> {
        let found = self.value_type(value);
        if found != expected {
            return Err(Error::TypeMismatch { expected, found });
        }
        Ok(())
    }

    fn value_type(&self, value: Value) -> Type {
        self.builder.func().value_type(value)
    }

    /// Pops the base address and folds in the static offset, casting the
    /// base to `ptr` first when necessary.
    fn effective_address(&mut self, offset: u32) -> Result<Value, Error> {
        let mut base = self.pop_value()?;
        if self.value_type(base) != Type::Ptr {
            base = self.builder.emit_value(Inst::Cast {
                operand: base,
                ty: Type::Ptr,
            });
        }
        let offset = self.builder.emit_value(Inst::Const {
            imm: Imm::Int(offset as i64),
            ty: Type::Ptr,
        });
        Ok(self.builder.emit_value(Inst::Binop {
            lhs: base,
            op: ir::BinOp::Add,
            rhs: offset,
            ty: Type::Ptr,
        }))
    }

    /// Pops an operand as a materialized value.
    ///
    /// A deferred comparison is coerced into an `i32` 0/1 through a
    /// two-armed diamond joined by a phi.
    fn pop_value(&mut self) -> Result<Value, Error> {
        match self.stack.pop()? {
            OperandEntry::Value(value) => Ok(value),
            OperandEntry::Compare { op, lhs, rhs } => {
                let ja = self.builder.new_block();
                let nein = self.builder.new_block();
                let immer = self.builder.new_block();
                self.builder.emit(Inst::CJump {
                    lhs,
                    op,
                    rhs,
                    then_dst: ja,
                    else_dst: nein,
                });
                self.builder.set_block(ja);
                let one = self.builder.emit_value(Inst::Const {
                    imm: Imm::Int(1),
                    ty: Type::I32,
                });
                self.builder.emit(Inst::Jump { target: immer });
                self.builder.set_block(nein);
                let zero = self.builder.emit_value(Inst::Const {
                    imm: Imm::Int(0),
                    ty: Type::I32,
                });
                self.builder.emit(Inst::Jump { target: immer });
                self.builder.set_block(immer);
                Ok(self.builder.emit_value(Inst::Phi {
                    ty: Type::I32,
                    incoming: vec![(ja, one), (nein, zero)],
                }))
            }
        }
    }

    /// Pops an operand as a branch condition without materializing it.
    ///
    /// A plain value `v` becomes `v != 0`.
    fn pop_condition(&mut self) -> Result<(Relop, Value, Value), Error> {
        match self.stack.pop()? {
            OperandEntry::Compare { op, lhs, rhs } => Ok((op, lhs, rhs)),
            OperandEntry::Value(value) => {
                let zero = self.builder.emit_value(Inst::Const {
                    imm: Imm::Int(0),
                    ty: Type::I32,
                });
                Ok((Relop::Ne, value, zero))
            }
        }
    }

    /// Consumes the operand-stack top into a region's result phi, if the
    /// region has one.
    fn fill_phi(&mut self, result: &mut Option<ResultPhi>) -> Result<(), Error> {
        if let Some(phi) = result {
            let value = self.pop_value()?;
            phi.incoming.push((self.builder.current_block(), value));
        }
        Ok(())
    }

    /// Records the operand-stack top in the result phi of the frame at
    /// `depth`, keeping the value on the stack.
    fn fill_frame_result(&mut self, depth: u32) -> Result<(), Error> {
        if self.frames.nth_from_top(depth)?.result.is_none() {
            return Ok(());
        }
        let value = self.pop_value()?;
        let block = self.builder.current_block();
        let phi = self
            .frames
            .nth_from_top_mut(depth)?
            .result
            .as_mut()
            .expect("presence of the result phi was checked above; qed");
        phi.incoming.push((block, value));
        self.stack.push_value(value);
        Ok(())
    }
}

/// A fresh result phi for a region with a declared result type.
fn result_phi(block_type: BlockType) -> Option<ResultPhi> {
    block_type.map(|ty| ResultPhi::new(ty.ir_type()))
}

fn zero_imm(ty: ValueType) -> Imm {
    match ty {
        ValueType::I32 | ValueType::I64 => Imm::Int(0),
        ValueType::F32 | ValueType::F64 => Imm::Float(0.0),
    }
}
