//! # Folio (Admin Access Gate)
//!
//! `folio` guards the admin area of a portfolio site. It decides, per request,
//! whether a visitor may reach an admin page, must log in first, or owes a
//! second authentication factor.
//!
//! ## Device Trust
//!
//! After a successful TOTP verification the browser can opt into device trust:
//! a signed token bound to the user id, written both to durable client storage
//! and to a `device_trust` cookie that expires after 30 days.
//!
//! - **Cookie is authoritative** for access decisions. Without it the device is
//!   untrusted, whatever durable storage says.
//! - **Durable timestamp is authoritative** for the "trusted until" display, and
//!   an expired timestamp revokes both locations.
//!
//! ## Access Gate
//!
//! [`gate::AccessGate::decide`] is a pure function of the path, the session,
//! the assurance levels reported by the identity provider, and device trust.
//! Provider failures fail closed: the visitor is sent to the verify page.
//!
//! ## Identity Provider
//!
//! Sessions, assurance levels and factor operations come from an external
//! identity service behind the [`identity::IdentityProvider`] trait. The shipped
//! implementation talks to a `GoTrue` compatible REST API.

pub mod api;
pub mod cli;
pub mod gate;
pub mod identity;
pub mod trust;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
