//! Infrastructure layer: store adapters for the authorization core.

pub mod in_memory;


pub use in_memory::{InMemoryMembershipStore, StoreMutation};
