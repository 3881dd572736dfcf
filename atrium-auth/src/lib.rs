//! # atrium-auth - Account registration and login
//!
//! ```text
//! HTTP (axum) ──► AuthService ──► CredentialStore
//!                  │  argon2id      ├── MemoryCredentialStore
//!                  ▼                └── RocksCredentialStore (cf "users")
//!             AuthError → 400 / 500 JSON {msg}
//! ```
//!
//! Emails are normalized (trimmed, lower-cased) before every lookup, so
//! registration is unique per case-insensitive email.

pub mod credentials;
pub mod password;
pub mod rocks;
pub mod service;
pub mod http;

pub use credentials::{
    normalize_email, CredentialRecord, CredentialStore, MemoryCredentialStore, StoreError,
};
pub use rocks::{RocksCredentialStore, RocksStoreConfig};
pub use service::{AuthError, AuthService};
pub use http::{router, AuthConfig, AuthServer};
