//! Token encode/decode and typed token-kind views/builders.

pub mod codec;
pub mod kinds;

pub use codec::{create, create_with_key, parse, parse_with_key, TokenError};
