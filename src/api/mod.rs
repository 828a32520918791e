//! HTTP API endpoints for the warden
//!
//! Provides REST APIs for:
//! - Admin review and enforcement (channels, bots, bans, profiles, limits)
//! - Inbound platform events relayed by the webhook front end
//! - Admin-key authentication and security headers

pub mod admin;
pub mod middleware;

pub use admin::{AdminApiState, create_admin_router, error_response};
pub use middleware::{
    AdminAuthState, auth_middleware, logging_middleware, security_headers_middleware,
};
