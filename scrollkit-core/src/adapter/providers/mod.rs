pub mod memory;
pub mod timeout;

pub use memory::InMemoryAdapter;
pub use timeout::{TimeoutAdapter, DEFAULT_READ_TIMEOUT};
