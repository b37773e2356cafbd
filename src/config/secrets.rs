//! Secret handling utilities.
//!
//! Re-exports secrecy types used for the database credentials.

pub use secrecy::{ExposeSecret, SecretString};
