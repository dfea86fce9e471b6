//! Core of a retargetable compiler toolchain: an LALR(1) parser generator
//! with its table-driven runtime automaton, and a WebAssembly-to-IR
//! lowering engine.
//!
//! The two subsystems share nothing at runtime but the same discipline:
//! a deterministic transformation of a declarative input into an
//! executable artifact under strict invariants.
//!
//! # Parser toolkit
//!
//! ```
//! use smelt::parser::{Grammar, LrParser, Token, TokenStream};
//!
//! let mut grammar = Grammar::<i64>::new(["x"], "S");
//! grammar.add_production("S", &["x"], None);
//! let parser = LrParser::generate(&grammar).unwrap();
//! let mut lexer = TokenStream::new(vec![Token::new("x", "x", 0)]);
//! assert_eq!(parser.parse(&mut lexer).unwrap(), None);
//! ```
//!
//! # Wasm lowering
//!
//! ```
//! use smelt::wasm::{self, Definition, FuncDef, FuncType, Id, Module, Op, TypeDef, Value};
//!
//! let module = Module::new(vec![
//!     Definition::Type(TypeDef {
//!         id: Id::Num(0),
//!         ty: FuncType { params: vec![], results: vec![wasm::ValueType::I32] },
//!     }),
//!     Definition::Func(FuncDef {
//!         id: Id::name("$answer"),
//!         type_ref: Id::Num(0),
//!         locals: vec![],
//!         body: vec![Op::Const(Value::I32(42))],
//!     }),
//! ]);
//! let lowered = wasm::lower(&module).unwrap();
//! assert!(lowered.function("answer").is_some());
//! ```

pub mod ir;
pub mod parser;
pub mod wasm;

mod error;

pub use self::error::Error;
