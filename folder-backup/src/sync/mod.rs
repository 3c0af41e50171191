pub mod engine;
pub mod filter;
pub mod metadata;
pub mod paths;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod walker;
