//! The intermediate representation produced by lowering.
//!
//! A [`Module`] owns module-level [`Variable`]s and a list of
//! [`Function`]s. Functions own their basic blocks; blocks own their
//! instructions in order. Values are dense per-function indices carrying a
//! [`Type`] tag; an instruction that produces a value does so exactly once,
//! at emission time. Blocks are finalized by a terminator instruction and
//! never reopened.

mod builder;

pub use self::builder::{Builder, FuncId};

use std::collections::VecDeque;
use std::fmt;

/// Type tag of an IR value.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Type {
    /// 32-bit integer.
    I32,
    /// 64-bit integer.
    I64,
    /// 32-bit IEEE 754 floating point number.
    F32,
    /// 64-bit IEEE 754 floating point number.
    F64,
    /// Pointer-sized integer used for all addresses.
    Ptr,
}

impl Type {
    /// Size of a value of this type in bytes.
    pub fn size(self) -> u32 {
        match self {
            Self::I32 | Self::F32 => 4,
            Self::I64 | Self::F64 | Self::Ptr => 8,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I32 => write!(f, "i32"),
            Self::I64 => write!(f, "i64"),
            Self::F32 => write!(f, "f32"),
            Self::F64 => write!(f, "f64"),
            Self::Ptr => write!(f, "ptr"),
        }
    }
}

/// A constant immediate. The carried [`Type`] of the surrounding
/// [`Inst::Const`] decides how the payload is interpreted.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Imm {
    Int(i64),
    Float(f64),
}

impl fmt::Display for Imm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
        }
    }
}

/// Binary operator of an [`Inst::Binop`].
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Rotl,
    Rotr,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Rotl => "rol",
            Self::Rotr => "ror",
        };
        write!(f, "{text}")
    }
}

/// Unary operator of an [`Inst::Unop`].
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum UnOp {
    Neg,
}

impl fmt::Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Neg => write!(f, "-"),
        }
    }
}

/// Relational operator of an [`Inst::CJump`] or a deferred comparison.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Relop {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for Relop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        };
        write!(f, "{text}")
    }
}

/// A value produced by an instruction, dense per function.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Value(pub(crate) u32);

/// A basic block of a function, dense per function.
///
/// Block ids stay stable across unreachable-block pruning; pruned blocks
/// are emptied and skipped by [`Function::blocks`].
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Block(pub(crate) u32);

/// A module-level variable, dense per module.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct VarId(pub(crate) u32);

/// Module-level storage with an initial byte image.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Variable {
    pub name: String,
    pub size: u32,
    pub align: u32,
    pub initial: Vec<u8>,
}

/// Distinguishes value-returning functions from procedures.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FunctionKind {
    /// Returns a single value of the given type.
    Function(Type),
    /// Returns nothing.
    Procedure,
}

/// One IR instruction.
#[derive(Clone, PartialEq, Debug)]
pub enum Inst {
    /// A typed constant.
    Const { imm: Imm, ty: Type },
    /// `lhs op rhs`, all of type `ty`.
    Binop {
        lhs: Value,
        op: BinOp,
        rhs: Value,
        ty: Type,
    },
    /// `op operand` of type `ty`.
    Unop { op: UnOp, operand: Value, ty: Type },
    /// Conversion of `operand` into `ty`.
    Cast { operand: Value, ty: Type },
    /// Load a `ty` from the `ptr`-typed `addr`.
    Load { addr: Value, ty: Type },
    /// Store `value` to the `ptr`-typed `addr`.
    Store { value: Value, addr: Value },
    /// A zero-initialized stack allocation.
    Alloc { size: u32, align: u32 },
    /// The address of an [`Inst::Alloc`] result.
    AddressOf { alloc: Value },
    /// The address of a module-level [`Variable`].
    VariableAddr { var: VarId },
    /// Call to a named value-returning function.
    FunctionCall {
        callee: String,
        args: Vec<Value>,
        ty: Type,
    },
    /// Call to a named procedure.
    ProcedureCall { callee: String, args: Vec<Value> },
    /// Call through a `ptr`-typed callee value.
    FunctionPointerCall {
        callee: Value,
        args: Vec<Value>,
        ty: Type,
    },
    /// Procedure call through a `ptr`-typed callee value.
    ProcedurePointerCall { callee: Value, args: Vec<Value> },
    /// Unconditional control transfer.
    Jump { target: Block },
    /// Two-way conditional control transfer on `lhs op rhs`.
    CJump {
        lhs: Value,
        op: Relop,
        rhs: Value,
        then_dst: Block,
        else_dst: Block,
    },
    /// Return a value from a function.
    Return { value: Value },
    /// Return from a procedure.
    Exit,
    /// Select a value by predecessor block.
    Phi {
        ty: Type,
        incoming: Vec<(Block, Value)>,
    },
    /// A named function parameter.
    Parameter { name: String, ty: Type },
}

impl Inst {
    /// The type of the value this instruction produces, if it produces one.
    pub fn result_type(&self) -> Option<Type> {
        match self {
            Self::Const { ty, .. }
            | Self::Binop { ty, .. }
            | Self::Unop { ty, .. }
            | Self::Cast { ty, .. }
            | Self::Load { ty, .. }
            | Self::FunctionCall { ty, .. }
            | Self::FunctionPointerCall { ty, .. }
            | Self::Phi { ty, .. }
            | Self::Parameter { ty, .. } => Some(*ty),
            Self::Alloc { .. } | Self::AddressOf { .. } | Self::VariableAddr { .. } => {
                Some(Type::Ptr)
            }
            Self::Store { .. }
            | Self::ProcedureCall { .. }
            | Self::ProcedurePointerCall { .. }
            | Self::Jump { .. }
            | Self::CJump { .. }
            | Self::Return { .. }
            | Self::Exit => None,
        }
    }

    /// Whether this instruction closes its basic block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Jump { .. } | Self::CJump { .. } | Self::Return { .. } | Self::Exit
        )
    }

    /// Successor blocks of a terminator; empty for `Return`/`Exit`.
    fn successors(&self) -> Vec<Block> {
        match self {
            Self::Jump { target } => vec![*target],
            Self::CJump {
                then_dst, else_dst, ..
            } => vec![*then_dst, *else_dst],
            _ => Vec::new(),
        }
    }
}

/// An emitted instruction together with the value it produced.
#[derive(Clone, PartialEq, Debug)]
pub struct InstData {
    pub inst: Inst,
    pub result: Option<Value>,
}

/// The body of one basic block.
#[derive(Clone, Debug, Default)]
pub struct BlockData {
    pub name: String,
    insts: Vec<InstData>,
    pruned: bool,
}

impl BlockData {
    /// A block with no instructions yet.
    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// A block whose last instruction is a terminator.
    pub fn is_closed(&self) -> bool {
        self.insts
            .last()
            .map(|data| data.inst.is_terminator())
            .unwrap_or(false)
    }

    /// Whether the block was removed by unreachable pruning.
    pub fn is_pruned(&self) -> bool {
        self.pruned
    }

    pub fn insts(&self) -> &[InstData] {
        &self.insts
    }

    fn push(&mut self, data: InstData) {
        debug_assert!(!self.is_closed(), "emitting into a closed block");
        self.insts.push(data);
    }
}

/// A function or procedure under or after construction.
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub kind: FunctionKind,
    pub entry: Option<Block>,
    pub parameters: Vec<Value>,
    blocks: Vec<BlockData>,
    value_types: Vec<Type>,
}

impl Function {
    fn new(name: &str, kind: FunctionKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            entry: None,
            parameters: Vec::new(),
            blocks: Vec::new(),
            value_types: Vec::new(),
        }
    }

    pub fn is_procedure(&self) -> bool {
        matches!(self.kind, FunctionKind::Procedure)
    }

    /// The type tag of a value of this function.
    pub fn value_type(&self, value: Value) -> Type {
        self.value_types[value.0 as usize]
    }

    pub fn block(&self, block: Block) -> &BlockData {
        &self.blocks[block.0 as usize]
    }

    fn block_mut(&mut self, block: Block) -> &mut BlockData {
        &mut self.blocks[block.0 as usize]
    }

    /// All live blocks in creation order.
    pub fn blocks(&self) -> impl Iterator<Item = (Block, &BlockData)> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, data)| !data.pruned)
            .map(|(index, data)| (Block(index as u32), data))
    }

    /// Removes all blocks not reachable from the entry block and drops phi
    /// incomings that refer to removed predecessors.
    pub fn delete_unreachable(&mut self) {
        let Some(entry) = self.entry else {
            return;
        };
        let mut reachable = vec![false; self.blocks.len()];
        let mut worklist = VecDeque::from([entry]);
        reachable[entry.0 as usize] = true;
        while let Some(block) = worklist.pop_front() {
            let successors = self
                .block(block)
                .insts
                .last()
                .map(|data| data.inst.successors())
                .unwrap_or_default();
            for successor in successors {
                if !reachable[successor.0 as usize] {
                    reachable[successor.0 as usize] = true;
                    worklist.push_back(successor);
                }
            }
        }
        for (index, data) in self.blocks.iter_mut().enumerate() {
            if !reachable[index] {
                data.pruned = true;
                data.insts.clear();
            }
        }
        for data in self.blocks.iter_mut().filter(|data| !data.pruned) {
            for inst in &mut data.insts {
                if let Inst::Phi { incoming, .. } = &mut inst.inst {
                    incoming.retain(|(block, _)| reachable[block.0 as usize]);
                }
            }
        }
    }
}

/// A whole lowered module.
#[derive(Debug)]
pub struct Module {
    pub name: String,
    pub variables: Vec<Variable>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|function| function.name == name)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|variable| variable.name == name)
    }
}
