//! Durable tables owned by the routing core.
//!
//! Two stores back the control loops: the connection store (routing key →
//! connection record, with TTL expiry) and the port-mapping cache
//! (destination address → accelerator mapping, wholesale-replaced on each
//! sync). Both are exposed as traits so a deployment can swap in a durable
//! backend; the in-memory implementations here are the shipped default.
//!
//! Neither store offers cross-key transactions; the core relies on atomic
//! single-key operations only.

pub mod connections;
pub mod mappings;

pub use connections::{ConnectionStore, MemoryConnectionStore};
pub use mappings::{MappingStore, MemoryMappingStore};
