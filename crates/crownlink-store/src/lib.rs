// crownlink-store: Async boundary to the headset vendor's realtime database.

pub mod backend;
pub mod error;
pub mod memory;
pub mod paths;

pub use backend::{AuthToken, Backend, LocalBackend};
pub use error::StoreError;
pub use memory::MemoryBackend;
