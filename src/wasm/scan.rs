use std::collections::BTreeMap;

use log::{debug, warn};

use crate::ir::{Builder, Type, VarId};
use crate::wasm::module::{
    Definition, ExportKind, FuncDef, FuncType, Id, ImportKind, Module,
};
use crate::Error;

/// A global slot: its IR type and the module variable backing it.
#[derive(Copy, Clone, Debug)]
pub struct GlobalSlot {
    pub ty: Type,
    pub var: VarId,
}

/// One function scheduled for lowering.
#[derive(Debug)]
pub struct LowerTask<'m> {
    pub name: String,
    pub ty: &'m FuncType,
    pub func: &'m FuncDef,
}

/// The symbol tables produced by scanning a module's definitions.
#[derive(Debug, Default)]
pub struct ScannedModule<'m> {
    /// `type` definitions by id.
    pub types: BTreeMap<Id, &'m FuncType>,
    /// Callable functions by id: resolved name and signature.
    pub callables: BTreeMap<Id, (String, &'m FuncType)>,
    /// Global slots by id.
    pub globals: BTreeMap<Id, GlobalSlot>,
    /// Defined functions in document order.
    pub functions: Vec<LowerTask<'m>>,
}

impl<'m> ScannedModule<'m> {
    pub fn signature(&self, type_ref: &Id) -> Result<&'m FuncType, Error> {
        self.types
            .get(type_ref)
            .copied()
            .ok_or_else(|| Error::UnsupportedWasm(format!("unknown type id {type_ref}")))
    }

    pub fn callable(&self, id: &Id) -> Result<&(String, &'m FuncType), Error> {
        self.callables
            .get(id)
            .ok_or_else(|| Error::UnsupportedWasm(format!("unknown function id {id}")))
    }

    pub fn global(&self, id: &Id) -> Result<GlobalSlot, Error> {
        self.globals
            .get(id)
            .copied()
            .ok_or_else(|| Error::UnsupportedWasm(format!("unknown global id {id}")))
    }
}

/// Walks the module's top-level definitions and builds the symbol tables
/// the per-function lowering works from.
///
/// Global initializers are packed into module variables here; `table`,
/// `memory`, `elem` and `data` definitions are outside the supported core
/// and are logged and skipped.
pub fn scan<'m>(module: &'m Module, builder: &mut Builder) -> Result<ScannedModule<'m>, Error> {
    let mut scanned = ScannedModule::default();
    // Names recorded by imports and exports, consulted when a defined
    // function has no textual id of its own.
    let mut recorded_names: BTreeMap<Id, String> = BTreeMap::new();

    for definition in &module.definitions {
        match definition {
            Definition::Type(ty) => {
                scanned.types.insert(ty.id.clone(), &ty.ty);
            }
            Definition::Import(import) => match &import.kind {
                ImportKind::Func { id, type_ref } => {
                    let signature = scanned.signature(type_ref)?;
                    let name = format!("{}_{}", import.module, import.name);
                    recorded_names.insert(id.clone(), name.clone());
                    scanned.callables.insert(id.clone(), (name, signature));
                }
                _ => {
                    return Err(Error::UnsupportedWasm(format!(
                        "import kind of '{}.{}'",
                        import.module, import.name
                    )));
                }
            },
            Definition::Export(export) => {
                if export.kind == ExportKind::Func {
                    recorded_names
                        .insert(export.target.clone(), export.name.clone());
                } else {
                    debug!("ignoring non-function export '{}'", export.name);
                }
            }
            Definition::Func(func) => {
                let signature = scanned.signature(&func.type_ref)?;
                let name = match func.id.as_text() {
                    Some(text) => text.to_string(),
                    None => match recorded_names.get(&func.id) {
                        Some(recorded) => recorded.clone(),
                        None => format!("unnamed{}", scanned.functions.len()),
                    },
                };
                scanned
                    .callables
                    .insert(func.id.clone(), (name.clone(), signature));
                scanned.functions.push(LowerTask {
                    name,
                    ty: signature,
                    func,
                });
            }
            Definition::Global(global) => {
                let ty = global.ty.ir_type();
                if global.init.ty() != global.ty {
                    return Err(Error::TypeMismatch {
                        expected: ty,
                        found: global.init.ty().ir_type(),
                    });
                }
                let image = global.init.to_le_bytes();
                let size = ty.size();
                debug_assert_eq!(image.len() as u32, size);
                let var = builder.new_variable(
                    &format!("global{}", global.id),
                    size,
                    size,
                    image,
                );
                scanned.globals.insert(global.id.clone(), GlobalSlot { ty, var });
            }
            Definition::Table(_)
            | Definition::Memory(_)
            | Definition::Element(_)
            | Definition::Data(_) => {
                warn!("definition kind '{}' not supported, skipping", definition.kind_name());
            }
        }
    }
    Ok(scanned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wasm::module::{
        ExportDef, GlobalDef, ImportDef, TypeDef, Value, ValueType,
    };
    use assert_matches::assert_matches;

    fn empty_type(id: u32) -> Definition {
        Definition::Type(TypeDef {
            id: Id::Num(id),
            ty: FuncType::default(),
        })
    }

    fn func(id: Id, type_ref: u32) -> Definition {
        Definition::Func(FuncDef {
            id,
            type_ref: Id::Num(type_ref),
            locals: Vec::new(),
            body: Vec::new(),
        })
    }

    #[test]
    fn function_names_prefer_textual_ids() {
        let module = Module::new(vec![empty_type(0), func(Id::name("$run"), 0)]);
        let mut builder = Builder::new("main");
        let scanned = scan(&module, &mut builder).unwrap();
        assert_eq!(scanned.functions[0].name, "run");
    }

    #[test]
    fn exported_name_is_used_for_numeric_ids() {
        let module = Module::new(vec![
            empty_type(0),
            Definition::Export(ExportDef {
                name: "entry".to_string(),
                kind: ExportKind::Func,
                target: Id::Num(0),
            }),
            func(Id::Num(0), 0),
        ]);
        let mut builder = Builder::new("main");
        let scanned = scan(&module, &mut builder).unwrap();
        assert_eq!(scanned.functions[0].name, "entry");
    }

    #[test]
    fn anonymous_functions_are_synthesized() {
        let module = Module::new(vec![empty_type(0), func(Id::Num(0), 0), func(Id::Num(1), 0)]);
        let mut builder = Builder::new("main");
        let scanned = scan(&module, &mut builder).unwrap();
        assert_eq!(scanned.functions[0].name, "unnamed0");
        assert_eq!(scanned.functions[1].name, "unnamed1");
    }

    #[test]
    fn imported_functions_join_module_and_field_names() {
        let module = Module::new(vec![
            empty_type(0),
            Definition::Import(ImportDef {
                module: "env".to_string(),
                name: "print".to_string(),
                kind: ImportKind::Func {
                    id: Id::name("$print"),
                    type_ref: Id::Num(0),
                },
            }),
        ]);
        let mut builder = Builder::new("main");
        let scanned = scan(&module, &mut builder).unwrap();
        let (name, _) = scanned.callable(&Id::name("$print")).unwrap();
        assert_eq!(name, "env_print");
    }

    #[test]
    fn global_initializer_is_packed_little_endian() {
        let module = Module::new(vec![Definition::Global(GlobalDef {
            id: Id::Num(0),
            ty: ValueType::I32,
            init: Value::I32(0x0102_0304),
        })]);
        let mut builder = Builder::new("main");
        let scanned = scan(&module, &mut builder).unwrap();
        let slot = scanned.global(&Id::Num(0)).unwrap();
        assert_eq!(slot.ty, Type::I32);
        let module = builder.finish();
        assert_eq!(module.variables[0].initial, vec![0x04, 0x03, 0x02, 0x01]);
        assert_eq!(module.variables[0].size, 4);
    }

    #[test]
    fn f64_global_initializer_is_ieee754() {
        let module = Module::new(vec![Definition::Global(GlobalDef {
            id: Id::name("$pi"),
            ty: ValueType::F64,
            init: Value::F64(1.5),
        })]);
        let mut builder = Builder::new("main");
        scan(&module, &mut builder).unwrap();
        let module = builder.finish();
        assert_eq!(module.variables[0].initial, 1.5f64.to_le_bytes().to_vec());
    }

    #[test]
    fn mismatched_initializer_type_is_rejected() {
        let module = Module::new(vec![Definition::Global(GlobalDef {
            id: Id::Num(0),
            ty: ValueType::I64,
            init: Value::I32(1),
        })]);
        let mut builder = Builder::new("main");
        assert_matches!(
            scan(&module, &mut builder),
            Err(Error::TypeMismatch {
                expected: Type::I64,
                found: Type::I32,
            })
        );
    }

    #[test]
    fn non_function_imports_are_unsupported() {
        let module = Module::new(vec![Definition::Import(ImportDef {
            module: "env".to_string(),
            name: "mem".to_string(),
            kind: ImportKind::Memory,
        })]);
        let mut builder = Builder::new("main");
        assert_matches!(
            scan(&module, &mut builder),
            Err(Error::UnsupportedWasm(message)) if message.contains("env.mem")
        );
    }
}
