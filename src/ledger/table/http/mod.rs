pub mod client;

#[cfg(test)]
mod tests;

pub use client::{HttpTableConnector, SasTableClient};
