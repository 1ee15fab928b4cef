//! HTTP API Server Module
//!
//! REST API used by the admin dashboard to start and control scraping jobs,
//! read ingested records and watch pipeline health.

pub mod auth;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod types;

pub use routes::create_router;
pub use server::HttpServer;
