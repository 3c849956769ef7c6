#![doc = include_str!("../README.md")]

pub mod core;
pub mod error;
pub mod keys;
pub mod session;
pub mod token;
pub mod types;
pub mod well_known;

// Re-exports for convenient access
pub use crate::core::{CoreClient, CoreConfig, IssuedTokens, SessionInformation, TokenInfo};
pub use error::Error;
pub use keys::{KeyCache, KeySource};
pub use session::{
    ResponseTokens, Session, SessionConfig, SessionContext, SessionError, SessionRejection,
    VerifyOptions,
};
pub use token::{
    AccessToken, AccessTokenClaims, PublicKey, extract_kid_from_token, looks_like_access_token,
};
pub use types::{KeyId, SessionHandle, TokenType, TransferMethod, UserId};
pub use well_known::{KeyStatus, SigningKey, SigningKeysDocument};
