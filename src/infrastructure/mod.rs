pub mod chunked_stream;
pub mod config;
pub mod http_response;
pub mod memory_cache;
pub mod memory_repository;
pub mod realtime;
pub mod rest_repository;
