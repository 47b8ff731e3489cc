//! Explicit, caller-constructed registry of zero-argument string functions
//! a template's `Var` section can bind a placeholder to. Never a lazy
//! global — tests substitute their own instance.

use std::collections::HashMap;
use std::sync::Arc;

type VarFn = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Clone, Default)]
pub struct VariableRegistry {
    functions: HashMap<String, VarFn>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, f: impl Fn() -> String + Send + Sync + 'static) {
        self.functions.insert(name.into(), Arc::new(f));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn call(&self, name: &str) -> Option<String> {
        self.functions.get(name).map(|f| f())
    }
}
