//! The `transport` module is responsible for the shape of network
//! communication: the JSON frame types exchanged between every pair of
//! roles, and the newline-delimited framing that carries them over TCP.
//!
//! The broker's accept loop and session handling live in
//! [`crate::broker::session`]; this module only knows about frames.

pub mod message;
pub mod tcp;
