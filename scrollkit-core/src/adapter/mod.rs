pub mod providers;
pub mod traits;
pub mod types;

pub use self::providers::{InMemoryAdapter, TimeoutAdapter, DEFAULT_READ_TIMEOUT};
pub use self::traits::DataAdapter;
pub use self::types::{
    Pagination, ReadParams, ReadResponse, ResponseMeta, SortDirection, SortSpec,
};
