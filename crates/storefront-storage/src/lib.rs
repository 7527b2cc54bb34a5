pub mod cart;
pub mod mem;
pub mod snapshot;
pub mod traits;

pub use cart::{CartStore, MemoryCartBackend};
pub use mem::InMemoryCatalog;
pub use snapshot::SeedRecord;
pub use traits::*;
