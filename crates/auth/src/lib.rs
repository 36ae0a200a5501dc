//! `rbac-auth` — authentication and authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage: it issues and
//! verifies session tokens, hashes credentials, owns the shared enforcement
//! policy and decides permission checks over an already-loaded user graph.

pub mod authorize;
pub mod claims;
pub mod credentials;
pub mod identity;
pub mod operations;
pub mod policy;
pub mod token;

pub use authorize::{Decision, decide};
pub use claims::{Claims, TokenError, validate_claims};
pub use credentials::{
    CredentialError, UNKNOWN_USER_CREDENTIAL, hash_credential, verify_credential,
};
pub use identity::Identity;
pub use operations::{HttpRoute, Operation, RPC_SERVICE};
pub use policy::{AccessPolicy, AuthnError, extract_bearer};
pub use token::{IssuedToken, SigningSecret, TokenService, default_token_ttl};
