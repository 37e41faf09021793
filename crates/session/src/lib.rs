//! Session lifecycle: the small locally cached meta envelope (expiry,
//! schema version, outstanding nonces) and the service that checks,
//! loads, and best-effort persists the full session blob.

pub mod meta;
pub mod service;

pub use meta::{Nonce, SessionMeta};
pub use service::SessionService;
