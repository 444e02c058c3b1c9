//! gateway error types

use snafu::prelude::*;

use super::api::Error as APIError;
use super::config::ConfigError;

/// gateway error type
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum Error {
    /// Options are invalid
    #[snafu(display("invalid gateway options: {source}"))]
    InvalidOptions {
        /// source error
        source: ConfigError,
    },

    /// Create the http api client of an account failed
    #[snafu(display("create api client for account {account} failed: {source}"))]
    CreateAPIClientFailed {
        /// account id
        account: String,
        /// source error
        source: APIError,
    },

    /// Two accounts share one id
    #[snafu(display("account {account} is already registered"))]
    DuplicateAccount {
        /// account id
        account: String,
    },
}
