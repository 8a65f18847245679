use std::collections::HashMap;
use std::fmt;

use crate::ir::expr::{max_var_id, Constructor, Function, VarGen};

/// Uniquely identifies a global within a `Module`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlobalId(pub u32);

/// A named top-level function.
#[derive(Debug, Clone)]
pub struct GlobalDef {
    pub name: String,
    pub func: Function,
}

/// The top-level IR container.
///
/// Invariants:
/// - Global names are unique within a module.
/// - Iteration order is insertion order; the module compiler derives the
///   dense global index from it.
/// - Passes mutate globals in place through the `pub(crate)` fields.
#[derive(Debug, Default)]
pub struct Module {
    pub name: String,
    pub(crate) globals: Vec<GlobalDef>,
    pub(crate) global_index: HashMap<String, GlobalId>,
    /// ADT definitions: type name → its constructors.
    pub(crate) adt_defs: HashMap<String, Vec<Constructor>>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Module {
        Module {
            name: name.into(),
            globals: Vec::new(),
            global_index: HashMap::new(),
            adt_defs: HashMap::new(),
        }
    }

    /// Registers a global function. Returns `Err` if the name is taken.
    pub fn add_global(
        &mut self,
        name: impl Into<String>,
        func: Function,
    ) -> Result<GlobalId, String> {
        let name = name.into();
        if self.global_index.contains_key(&name) {
            return Err(format!("global '{}' already defined", name));
        }
        let id = GlobalId(self.globals.len() as u32);
        self.global_index.insert(name.clone(), id);
        self.globals.push(GlobalDef { name, func });
        Ok(id)
    }

    /// Registers an ADT definition. Returns `Err` if the name is taken.
    pub fn add_adt(
        &mut self,
        name: impl Into<String>,
        constructors: Vec<Constructor>,
    ) -> Result<(), String> {
        let name = name.into();
        if self.adt_defs.contains_key(&name) {
            return Err(format!("ADT '{}' already defined", name));
        }
        self.adt_defs.insert(name, constructors);
        Ok(())
    }

    /// Looks up a global function by name.
    pub fn global(&self, name: &str) -> Option<&Function> {
        let id = self.global_index.get(name)?;
        self.globals.get(id.0 as usize).map(|g| &g.func)
    }

    pub fn contains_global(&self, name: &str) -> bool {
        self.global_index.contains_key(name)
    }

    pub fn globals(&self) -> &[GlobalDef] {
        &self.globals
    }

    /// Looks up the constructors of an ADT.
    pub fn constructors(&self, adt: &str) -> Option<&[Constructor]> {
        self.adt_defs.get(adt).map(|c| c.as_slice())
    }

    /// Iterates all declared constructors, across all ADTs.
    pub fn all_constructors(&self) -> impl Iterator<Item = &Constructor> {
        self.adt_defs.values().flatten()
    }

    /// A fresh-variable supply whose ids sit above everything in the module.
    pub(crate) fn var_gen(&self) -> VarGen {
        let max = self
            .globals
            .iter()
            .map(|g| max_var_id(&g.func))
            .max()
            .unwrap_or(0);
        VarGen::new(max + 1)
    }

    /// Drops globals not matching `pred` and rebuilds the name index.
    pub(crate) fn retain_globals(&mut self, pred: impl Fn(&GlobalDef) -> bool) {
        self.globals.retain(|g| pred(g));
        self.global_index.clear();
        for (i, g) in self.globals.iter().enumerate() {
            self.global_index.insert(g.name.clone(), GlobalId(i as u32));
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "// module: {}", self.name)?;
        for g in &self.globals {
            writeln!(f, "@{} = {}", g.name, g.func)?;
        }
        Ok(())
    }
}
