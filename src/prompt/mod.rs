//! Prompt template engine: a small section-based grammar compiled once into
//! immutable fragments plus recorded variable call sites, so re-rendering at
//! request time is O(1) in the number of placeholders.

mod parser;
mod registry;
mod template;

pub use parser::parse;
pub use registry::VariableRegistry;
pub use template::{CallSite, ParsedPrompt};
