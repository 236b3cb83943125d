pub mod access;
pub mod auth;
pub mod engine;
pub mod fetcher;
pub mod storage;
pub mod transform;
