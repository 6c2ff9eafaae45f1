//! The `broker` module is the core of the mesh.
//!
//! It contains the following main components:
//!
//! - `Broker`: the engine holding the topic table, subscription table,
//!   local session maps, and peer link set, with every state-mutating
//!   operation and the sync record emission/application logic.
//! - `session`: the accept loop and per-connection request handling.
//! - `peer`: outbound links to other brokers and mesh bootstrap.
//! - `Topic`: the record stored per topic id.
//!
//! The broker replicates every mutation to its peers so a subscriber
//! connected anywhere in the mesh sees one logical topic space.

pub mod engine;
pub mod peer;
pub mod session;
pub mod topic;

pub use engine::Broker;

#[cfg(test)]
mod tests;
