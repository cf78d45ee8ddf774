//! Adapters between the engine and the outside world: the JSON-lines command
//! script replayed by the CLI and the CSV commitment summary it prints.

pub mod csv;
pub mod script;
