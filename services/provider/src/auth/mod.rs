//! Credentials used to authenticate against the remote policy service.
//!
//! # Purpose
//! Exposes the bearer-token capability the HTTP store depends on. Token
//! acquisition details stay behind [`credentials::CredentialProvider`].
pub mod credentials;
