pub mod cache_coordinator;
pub mod dashboard_service;
pub mod dashboard_session;
pub mod errors;
pub mod prefetch;
pub mod widget_repository;
