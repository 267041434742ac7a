pub mod api;
pub mod filter;
pub mod http;
pub mod mock;

pub use api::{TableApi, TableConnector};
pub use filter::TimestampFilter;
pub use http::{HttpTableConnector, SasTableClient};
pub use mock::{InMemoryTable, MemoryConnector};
