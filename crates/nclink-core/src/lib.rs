//! Core types: user identifiers, OAuth tokens, expiry arithmetic, tracing

pub mod token;
pub mod tracing;

pub use token::{DEFAULT_GRANT_TTL_SECS, DEFAULT_SKEW_SECS, Token, User, UserId};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing, parse_level};
