//! JetBrains AI credential library
//!
//! Account document model and storage, plus the vendor calls needed to keep
//! an account's tokens current. This crate has no scheduling or policy of
//! its own. It is used by the account manager and can be tested on its own.
//!
//! Token flow for one account:
//! 1. `token::TokenClient::refresh_id_token()` trades the refresh token for
//!    a new id token (only when the id token is near expiry)
//! 2. `token::TokenClient::refresh_access_token()` trades the id token and
//!    license id for an AI-platform access token
//! 3. `store::AccountStore::update_account()` persists the result, taking a
//!    backup of the previous file first
//! 4. `token::TokenClient::check_quota()` refreshes the stored quota snapshot

pub mod account;
pub mod constants;
pub mod error;
pub mod jwt;
pub mod quota;
pub mod store;
pub mod token;

pub use account::{AccountRecord, AccountsDocument, QuotaInfo, QuotaStatus, Timestamp};
pub use constants::*;
pub use error::{Error, Result};
pub use store::{AccountStore, write_json_atomic};
pub use token::{AccessGrant, Endpoints, IdGrant, TokenClient};
