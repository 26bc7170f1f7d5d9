pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod lottery;
pub mod query;
pub mod repository;
pub mod rpc;

#[cfg(test)]
mod test_utils;
