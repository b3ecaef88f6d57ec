//! The fabric: shared coordination state for concurrently running phases
//! (spec 4.2) — phase lifecycle mirror, exported-symbol contracts, file
//! claims, discoveries, and pulses, single-writer-many-reader over a
//! durable `rusqlite` store.

mod store;
mod types;

pub use store::FabricStore;
pub use types::{
    Contract, ContractKind, ContractStatus, Discovery, DiscoveryKind, FabricSnapshot, FileClaim,
    PhaseStatus, Pulse, PulseKind,
};
