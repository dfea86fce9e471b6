use log::debug;

use super::{
    Block, BlockData, Function, FunctionKind, Inst, InstData, Module, Type, Value, VarId, Variable,
};

/// A handle to a function under construction.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct FuncId(usize);

/// Incrementally constructs an IR [`Module`].
///
/// The builder keeps two cursors: the current function and the current
/// block. [`Builder::emit`] appends to the current block and hands back the
/// produced value, if the instruction produces one. Emitting into a closed
/// block is a programming error caught by a debug assertion.
#[derive(Debug)]
pub struct Builder {
    module: Module,
    current_function: Option<FuncId>,
    current_block: Option<Block>,
    block_counter: u32,
}

impl Builder {
    pub fn new(module_name: &str) -> Self {
        Self {
            module: Module {
                name: module_name.to_string(),
                variables: Vec::new(),
                functions: Vec::new(),
            },
            current_function: None,
            current_block: None,
            block_counter: 0,
        }
    }

    /// Creates a new value-returning function.
    pub fn new_function(&mut self, name: &str, ret: Type) -> FuncId {
        self.push_function(Function::new(name, FunctionKind::Function(ret)))
    }

    /// Creates a new procedure.
    pub fn new_procedure(&mut self, name: &str) -> FuncId {
        self.push_function(Function::new(name, FunctionKind::Procedure))
    }

    fn push_function(&mut self, function: Function) -> FuncId {
        let id = FuncId(self.module.functions.len());
        self.module.functions.push(function);
        id
    }

    /// Selects the function the block and emit cursors operate on.
    pub fn set_function(&mut self, function: FuncId) {
        self.current_function = Some(function);
        self.current_block = None;
    }

    /// The function currently under construction.
    pub fn func(&self) -> &Function {
        &self.module.functions[self.expect_function().0]
    }

    pub fn func_mut(&mut self) -> &mut Function {
        let id = self.expect_function();
        &mut self.module.functions[id.0]
    }

    fn expect_function(&self) -> FuncId {
        self.current_function
            .expect("a function must be selected before building blocks; qed")
    }

    /// Appends a fresh, open block to the current function.
    pub fn new_block(&mut self) -> Block {
        self.block_counter += 1;
        let name = format!("{}_block{}", self.func().name, self.block_counter);
        debug!("creating block {name}");
        let function = self.func_mut();
        let block = Block(function.blocks.len() as u32);
        function.blocks.push(BlockData {
            name,
            ..BlockData::default()
        });
        block
    }

    /// Selects the block that [`Builder::emit`] appends to.
    pub fn set_block(&mut self, block: Block) {
        self.current_block = Some(block);
    }

    pub fn current_block(&self) -> Block {
        self.current_block
            .expect("a block must be selected before emitting; qed")
    }

    /// Emits `inst` into the current block, returning the produced value.
    pub fn emit(&mut self, inst: Inst) -> Option<Value> {
        let block = self.current_block();
        let function = self.func_mut();
        let result = inst.result_type().map(|ty| {
            let value = Value(function.value_types.len() as u32);
            function.value_types.push(ty);
            value
        });
        function.block_mut(block).push(InstData { inst, result });
        result
    }

    /// Emits an instruction that is known to produce a value.
    pub fn emit_value(&mut self, inst: Inst) -> Value {
        self.emit(inst)
            .expect("instruction shape was checked to produce a value; qed")
    }

    /// Creates a module-level variable with the given initial byte image.
    pub fn new_variable(&mut self, name: &str, size: u32, align: u32, initial: Vec<u8>) -> VarId {
        let id = VarId(self.module.variables.len() as u32);
        self.module.variables.push(Variable {
            name: name.to_string(),
            size,
            align,
            initial,
        });
        id
    }

    /// Finishes the build and hands out the module.
    pub fn finish(self) -> Module {
        self.module
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Imm;

    #[test]
    fn emit_tracks_results_and_block_state() {
        let mut builder = Builder::new("test");
        let func = builder.new_function("answer", Type::I32);
        builder.set_function(func);
        let entry = builder.new_block();
        builder.func_mut().entry = Some(entry);
        builder.set_block(entry);

        assert!(builder.func().block(entry).is_empty());
        let value = builder
            .emit(Inst::Const {
                imm: Imm::Int(42),
                ty: Type::I32,
            })
            .unwrap();
        assert_eq!(builder.func().value_type(value), Type::I32);
        assert!(builder.emit(Inst::Return { value }).is_none());
        assert!(builder.func().block(entry).is_closed());
    }

    #[test]
    fn delete_unreachable_prunes_and_filters_phis() {
        let mut builder = Builder::new("test");
        let func = builder.new_function("f", Type::I32);
        builder.set_function(func);
        let entry = builder.new_block();
        let live = builder.new_block();
        let dead = builder.new_block();
        builder.func_mut().entry = Some(entry);

        builder.set_block(entry);
        let one = builder.emit_value(Inst::Const {
            imm: Imm::Int(1),
            ty: Type::I32,
        });
        builder.emit(Inst::Jump { target: live });

        builder.set_block(dead);
        let two = builder.emit_value(Inst::Const {
            imm: Imm::Int(2),
            ty: Type::I32,
        });
        builder.emit(Inst::Jump { target: live });

        builder.set_block(live);
        let phi = builder.emit_value(Inst::Phi {
            ty: Type::I32,
            incoming: vec![(entry, one), (dead, two)],
        });
        builder.emit(Inst::Return { value: phi });

        let mut module = builder.finish();
        let function = &mut module.functions[0];
        function.delete_unreachable();

        assert!(function.block(dead).is_pruned());
        assert_eq!(function.blocks().count(), 2);
        let phi_inst = &function.block(live).insts()[0].inst;
        match phi_inst {
            Inst::Phi { incoming, .. } => assert_eq!(incoming.as_slice(), &[(entry, one)]),
            other => panic!("expected phi, got {other:?}"),
        }
    }
}
