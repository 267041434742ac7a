pub mod client;

pub use client::{InMemoryTable, MemoryConnector};
