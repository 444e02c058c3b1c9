use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use snafu::prelude::*;

use super::error::variant::*;
use super::types::*;
use super::Result;
use crate::source::{EventSource, SourceError};

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Remote source HTTP API Client
#[derive(Debug, Clone)]
pub struct Client {
    client: reqwest::Client,
    base_url: String,
}

impl Client {
    fn new<S: AsRef<str> + ?Sized>(
        auth_type: &'static str,
        base_url: &str,
        token: &S,
    ) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();

        url::Url::parse(&base_url).with_context(|_| BaseURLInvalid {
            base_url: &base_url,
        })?;

        let mut auth_header_value: reqwest::header::HeaderValue =
            format!("{} {}", auth_type, token.as_ref())
                .parse()
                .map_err(|_| {
                    TokenInvalid {
                        base_url: &base_url,
                    }
                    .build()
                })?;
        auth_header_value.set_sensitive(true);

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::AUTHORIZATION, auth_header_value);

        let client = reqwest::Client::builder()
            .gzip(true)
            .deflate(true)
            .user_agent(APP_USER_AGENT)
            .default_headers(headers)
            .build()
            .context(ClientCreateFailed)?;

        Ok(Self { client, base_url })
    }

    /// create a new api client using bot token
    pub fn new_from_bot_token<S: AsRef<str> + ?Sized>(base_url: &str, token: &S) -> Result<Self> {
        Self::new("Bot", base_url, token)
    }

    /// api base url, without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request<R, B>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<R>
    where
        R: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.request(method.clone(), &url);

        if !query.is_empty() {
            req = req.query(query);
        }

        if let Some(body) = body {
            req = req.json(body);
        }

        let req = req.build().context(BuildRequestFailed)?;

        log::trace!("{} {}", method, req.url());

        let resp = self
            .client
            .execute(req)
            .await
            .with_context(|_| RequestFailed {
                method: method.clone(),
                url: &url,
            })?;

        ensure!(
            resp.status() == StatusCode::OK,
            HTTPStatusNotOK {
                method: method.clone(),
                url: &url,
                status_code: resp.status()
            }
        );

        let body = resp.bytes().await.with_context(|_| RequestFailed {
            method: method.clone(),
            url: &url,
        })?;

        let result: Response<R> =
            serde_json::from_slice(&body).with_context(|_| ParseBodyFailed { body })?;

        ensure!(
            result.code == 0,
            CodeNotZero {
                code: result.code,
                message: result.message
            }
        );

        result.data.context(DataMissing { url: &url })
    }

    /// Call POST /realtime/ticket, get a push session credential
    pub async fn connection_credential(&self) -> Result<ConnectionCredential> {
        self.request::<_, ()>(Method::POST, "/realtime/ticket", &[], None)
            .await
    }

    /// Call GET /events, list events after cursor
    pub async fn events(&self, cursor: Option<&str>) -> Result<EventPage> {
        match cursor {
            Some(c) => {
                self.request::<_, ()>(Method::GET, "/events", &[("cursor", c)], None)
                    .await
            }
            None => self.request::<_, ()>(Method::GET, "/events", &[], None).await,
        }
    }

    /// Call POST /messages, send a reply. Not used by the delivery path itself.
    pub async fn send_message(&self, thread_id: Option<&str>, content: &str) -> Result<String> {
        let body = SendMessageRequest { thread_id, content };
        let data: SendMessageData = self
            .request(Method::POST, "/messages", &[], Some(&body))
            .await?;
        Ok(data.id)
    }
}

#[async_trait::async_trait]
impl EventSource for Client {
    async fn request_credential(&self) -> std::result::Result<ConnectionCredential, SourceError> {
        Ok(self.connection_credential().await?)
    }

    async fn list_events(&self, cursor: Option<&str>) -> std::result::Result<EventPage, SourceError> {
        Ok(self.events(cursor).await?)
    }
}
