//! Apple App Store integration: ASSN signature verification, JWS claim
//! decoding, and the App Store Server API client.

pub mod client;
pub mod jws;
pub mod signature;

pub use client::AppStoreClient;
pub use jws::TransactionClaims;
pub use signature::{SignatureError, SignatureVerifier};
