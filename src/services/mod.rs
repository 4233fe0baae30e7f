pub mod analyzer;
pub mod cache_service;
pub mod hashing;
pub mod session_service;
