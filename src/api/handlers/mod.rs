//! API handlers for Folio.
//!
//! Session and MFA endpoints live under `/api/auth`, the forward-auth probe
//! under `/gate/check`. Shared session resolution is in [`principal`].

pub mod device_trust;
pub mod gate;
pub mod health;
pub mod mfa;
pub(crate) mod principal;
pub mod session;
pub mod types;
