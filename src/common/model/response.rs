use serde::de::DeserializeOwned;
use std::borrow::Cow;
use url::Url;

use super::headers::Headers;
use super::request::Request;
use crate::errors::{ParserError, Result};

#[derive(Debug, Clone)]
pub struct Response {
    /// Final url after redirects.
    pub url: Url,
    pub status_code: u16,
    pub headers: Headers,
    pub content: Vec<u8>,
    /// The request this response answers.
    pub request: Request,
}

impl Response {
    /// An empty `200` bound to `request`, used when a crawler skips the fetch.
    pub fn empty_for(request: Request) -> Self {
        Response {
            url: request.url.clone(),
            status_code: 200,
            headers: Headers::new(),
            content: Vec::new(),
            request,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.content)
            .map_err(|e| ParserError::JsonParseError(e.into()).into())
    }
}
