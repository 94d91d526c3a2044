//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (peer address via ConnectInfo)
//!     → server.rs (Axum setup, layer stack)
//!     → telemetry stage (event per request)
//!     → request_id.rs (assign / echo x-request-id)
//!     → routes.rs (application handlers)
//!     → Send to client
//! ```

pub mod request_id;
pub mod routes;
pub mod server;

pub use request_id::{MintRequestId, RouterRequestIdExt};
pub use server::HttpServer;
