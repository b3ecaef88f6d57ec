//! CLI command implementations: one module per verb, plus the generic
//! process-backed agent/lint adapters `apply` wires up by default.

pub mod apply;
pub mod invoker;
pub mod plan;
pub mod status;
pub mod validate;
