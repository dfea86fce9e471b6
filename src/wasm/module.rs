use std::fmt;

use crate::ir;

/// A Wasm value type.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
}

impl ValueType {
    /// The IR type this Wasm type lowers to.
    pub fn ir_type(self) -> ir::Type {
        match self {
            Self::I32 => ir::Type::I32,
            Self::I64 => ir::Type::I64,
            Self::F32 => ir::Type::F32,
            Self::F64 => ir::Type::F64,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ir_type())
    }
}

/// A Wasm constant of one of the four value types.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Value {
    pub fn ty(self) -> ValueType {
        match self {
            Self::I32(_) => ValueType::I32,
            Self::I64(_) => ValueType::I64,
            Self::F32(_) => ValueType::F32,
            Self::F64(_) => ValueType::F64,
        }
    }

    /// The IR immediate encoding of this constant.
    pub fn imm(self) -> ir::Imm {
        match self {
            Self::I32(value) => ir::Imm::Int(value as i64),
            Self::I64(value) => ir::Imm::Int(value),
            Self::F32(value) => ir::Imm::Float(value as f64),
            Self::F64(value) => ir::Imm::Float(value),
        }
    }

    /// The little-endian byte image used for global initializers.
    pub fn to_le_bytes(self) -> Vec<u8> {
        match self {
            Self::I32(value) => value.to_le_bytes().to_vec(),
            Self::I64(value) => value.to_le_bytes().to_vec(),
            Self::F32(value) => value.to_le_bytes().to_vec(),
            Self::F64(value) => value.to_le_bytes().to_vec(),
        }
    }
}

/// Identifier of a definition: the numeric index from the binary format or
/// the textual id (with its `$` sigil) from the text format.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Id {
    Num(u32),
    Name(String),
}

impl Id {
    pub fn name(name: &str) -> Self {
        Self::Name(name.to_string())
    }

    /// The textual id with its leading sigil removed, if this is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Num(_) => None,
            Self::Name(name) => Some(name.trim_start_matches('$')),
        }
    }
}

impl From<u32> for Id {
    fn from(index: u32) -> Self {
        Self::Num(index)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(index) => write!(f, "{index}"),
            Self::Name(name) => write!(f, "{name}"),
        }
    }
}

/// A function signature.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct FuncType {
    /// Parameters in declaration order, optionally named.
    pub params: Vec<(Option<Id>, ValueType)>,
    /// Result types; at most one is supported by the lowerer.
    pub results: Vec<ValueType>,
}

/// A `type` definition.
#[derive(Clone, Debug)]
pub struct TypeDef {
    pub id: Id,
    pub ty: FuncType,
}

/// What an `import` definition brings into scope.
#[derive(Clone, Debug)]
pub enum ImportKind {
    /// An imported function with its local id and the id of its type.
    Func { id: Id, type_ref: Id },
    Table,
    Memory,
    Global,
}

/// An `import` definition.
#[derive(Clone, Debug)]
pub struct ImportDef {
    pub module: String,
    pub name: String,
    pub kind: ImportKind,
}

/// The kind of definition an `export` refers to.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ExportKind {
    Func,
    Table,
    Memory,
    Global,
}

/// An `export` definition.
#[derive(Clone, Debug)]
pub struct ExportDef {
    pub name: String,
    pub kind: ExportKind,
    pub target: Id,
}

/// A defined function: its type reference, declared locals and body.
#[derive(Clone, Debug)]
pub struct FuncDef {
    pub id: Id,
    pub type_ref: Id,
    /// Declared locals following the parameters, optionally named.
    pub locals: Vec<(Option<Id>, ValueType)>,
    pub body: Vec<Op>,
}

/// A `global` definition. The initializer must be a constant.
#[derive(Clone, Debug)]
pub struct GlobalDef {
    pub id: Id,
    pub ty: ValueType,
    pub init: Value,
}

/// One top-level module definition, in document order.
#[derive(Clone, Debug)]
pub enum Definition {
    Type(TypeDef),
    Import(ImportDef),
    Export(ExportDef),
    Func(FuncDef),
    Global(GlobalDef),
    /// Recognized but unsupported definition kinds; logged and skipped.
    Table(Id),
    Memory(Id),
    Element(Id),
    Data(Id),
}

impl Definition {
    /// Short kind name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Type(_) => "type",
            Self::Import(_) => "import",
            Self::Export(_) => "export",
            Self::Func(_) => "func",
            Self::Global(_) => "global",
            Self::Table(_) => "table",
            Self::Memory(_) => "memory",
            Self::Element(_) => "elem",
            Self::Data(_) => "data",
        }
    }
}

/// A Wasm module at the definition level.
#[derive(Clone, Debug, Default)]
pub struct Module {
    pub definitions: Vec<Definition>,
}

impl Module {
    pub fn new(definitions: Vec<Definition>) -> Self {
        Self { definitions }
    }
}

/// Binary arithmetic and bitwise operators.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    DivS,
    DivU,
    And,
    Or,
    Xor,
    Shl,
    ShrS,
    ShrU,
    Rotl,
    Rotr,
}

impl BinaryOp {
    /// The IR operator this Wasm operator maps to. Signedness collapses:
    /// the IR carries one division and one shift-right.
    pub fn ir_op(self) -> ir::BinOp {
        match self {
            Self::Add => ir::BinOp::Add,
            Self::Sub => ir::BinOp::Sub,
            Self::Mul => ir::BinOp::Mul,
            Self::Div | Self::DivS | Self::DivU => ir::BinOp::Div,
            Self::And => ir::BinOp::And,
            Self::Or => ir::BinOp::Or,
            Self::Xor => ir::BinOp::Xor,
            Self::Shl => ir::BinOp::Shl,
            Self::ShrS | Self::ShrU => ir::BinOp::Shr,
            Self::Rotl => ir::BinOp::Rotl,
            Self::Rotr => ir::BinOp::Rotr,
        }
    }
}

/// Comparison operators, including the unary `eqz`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CompareOp {
    Eqz,
    Eq,
    Ne,
    LtS,
    LtU,
    Lt,
    GtS,
    GtU,
    Gt,
    LeS,
    LeU,
    Le,
    GeS,
    GeU,
    Ge,
}

impl CompareOp {
    pub fn relop(self) -> ir::Relop {
        match self {
            Self::Eqz | Self::Eq => ir::Relop::Eq,
            Self::Ne => ir::Relop::Ne,
            Self::LtS | Self::LtU | Self::Lt => ir::Relop::Lt,
            Self::GtS | Self::GtU | Self::Gt => ir::Relop::Gt,
            Self::LeS | Self::LeU | Self::Le => ir::Relop::Le,
            Self::GeS | Self::GeU | Self::Ge => ir::Relop::Ge,
        }
    }
}

/// Conversion operators. The destination IR type is the type on the left
/// of the mnemonic.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CastOp {
    I32WrapI64,
    I64ExtendSI32,
    I64ExtendUI32,
    F64ConvertSI32,
    F64ConvertUI32,
    F64ReinterpretI64,
}

impl CastOp {
    pub fn target_type(self) -> ir::Type {
        match self {
            Self::I32WrapI64 => ir::Type::I32,
            Self::I64ExtendSI32 | Self::I64ExtendUI32 => ir::Type::I64,
            Self::F64ConvertSI32 | Self::F64ConvertUI32 | Self::F64ReinterpretI64 => ir::Type::F64,
        }
    }
}

/// The declared result of a structured control region; `None` for an
/// empty block type.
pub type BlockType = Option<ValueType>;

/// One Wasm instruction, grouped by opcode family.
///
/// The dispatcher is a closed `match` over this enum; anything it cannot
/// lower (`Sqrt`, for now) reports `UnsupportedWasm` from its own arm.
#[derive(Clone, PartialEq, Debug)]
pub enum Op {
    /// `T.add`, `T.sub`, `T.mul`, `T.div*`, bitwise, shifts, rotates.
    Binary { ty: ValueType, op: BinaryOp },
    /// `T.eq`, `T.ne`, the ordered comparisons and `T.eqz`.
    Compare { ty: ValueType, op: CompareOp },
    /// `T.load` with its offset and alignment immediates.
    Load { ty: ValueType, offset: u32, align: u32 },
    /// `T.store` with its offset and alignment immediates.
    Store { ty: ValueType, offset: u32, align: u32 },
    /// The conversion family.
    Cast(CastOp),
    /// `T.const imm`.
    Const(Value),
    /// `f64.floor`.
    Floor(ValueType),
    /// `f64.neg`.
    Neg(ValueType),
    /// `f64.sqrt`; unsupported by the core lowerer.
    Sqrt(ValueType),
    /// `get_local i`.
    LocalGet(u32),
    /// `set_local i`.
    LocalSet(u32),
    /// `tee_local i`.
    LocalTee(u32),
    /// `get_global id`.
    GlobalGet(Id),
    /// `set_global id`.
    GlobalSet(Id),
    /// `block T`.
    Block(BlockType),
    /// `loop T`.
    Loop(BlockType),
    /// `if T`.
    If(BlockType),
    Else,
    End,
    /// `br depth`, innermost frame at depth 0.
    Br(u32),
    /// `br_if depth`.
    BrIf(u32),
    /// `call id`.
    Call(Id),
    /// `call_indirect type_id`.
    CallIndirect(Id),
    Return,
    Select,
    Drop,
    Unreachable,
}
