use std::{fmt::Display, str::FromStr};

use snafu::prelude::*;

/// Parse string as push endpoint url error
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum ParseEndpointError {
    #[snafu(display("{s} is an invalid url: {source}"))]
    /// the str is not a valid url
    InvalidURL {
        /// string be parsed
        s: String,
        /// source error
        source: url::ParseError,
    },

    /// the parsed url schema is not websocket
    #[snafu(display("the url {s} has invalid schema {schema}, only ws or wss is ok"))]
    InvalidSchema {
        /// the url
        s: String,
        /// invalid schema
        schema: String,
    },

    /// the parsed url has no host
    #[snafu(display("the endpoint url {s} has no host"))]
    NoHost {
        /// the url
        s: String,
    },
}

/// Parsed push endpoint url, as returned with a connection credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: url::Url,
    /// server -> client frames are zlib compressed binary
    pub compress: bool,
}

impl Endpoint {
    /// Final url to connect, with the ticket attached.
    pub fn url(&self, ticket: &str) -> url::Url {
        let mut u = self.url.clone();
        u.query_pairs_mut().append_pair("ticket", ticket);
        u
    }

    /// host of the endpoint, for logging
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }
}

impl FromStr for Endpoint {
    type Err = ParseEndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = url::Url::parse(s).with_context(|_| error::InvalidURL { s })?;

        ensure!(
            url.scheme() == "wss" || url.scheme() == "ws",
            error::InvalidSchema {
                s,
                schema: url.scheme(),
            }
        );

        ensure!(url.host().is_some(), error::NoHost { s });

        let compress = url
            .query_pairs()
            .any(|(k, v)| k == "compress" && v == "1");

        Ok(Self { url, compress })
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.url.fmt(f)
    }
}
