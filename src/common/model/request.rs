use std::fmt::Display;
use url::Url;

use super::command::CommandRequest;
use super::cookies::{CookieItem, Cookies};
use super::headers::Headers;
use crate::errors::{Error, RequestError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
}

impl AsRef<str> for RequestMethod {
    fn as_ref(&self) -> &str {
        match self {
            RequestMethod::Get => "GET",
            RequestMethod::Post => "POST",
            RequestMethod::Put => "PUT",
            RequestMethod::Delete => "DELETE",
            RequestMethod::Head => "HEAD",
            RequestMethod::Options => "OPTIONS",
            RequestMethod::Patch => "PATCH",
        }
    }
}

impl Display for RequestMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl TryFrom<&str> for RequestMethod {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        match value.trim().to_uppercase().as_str() {
            "" | "GET" => Ok(RequestMethod::Get),
            "POST" => Ok(RequestMethod::Post),
            "PUT" => Ok(RequestMethod::Put),
            "DELETE" => Ok(RequestMethod::Delete),
            "HEAD" => Ok(RequestMethod::Head),
            "OPTIONS" => Ok(RequestMethod::Options),
            "PATCH" => Ok(RequestMethod::Patch),
            other => Err(RequestError::InvalidMethod(other.to_string()).into()),
        }
    }
}

/// HTTP request handed to the downloader, and yielded by crawlers as a
/// follow-up to crawl next.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub url: Url,
    pub headers: Headers,
    pub cookies: Cookies,
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn new(method: RequestMethod, url: impl AsRef<str>) -> Result<Self> {
        let url = Url::parse(url.as_ref())?;
        Ok(Request {
            method: method.to_string(),
            url,
            headers: Headers::new(),
            cookies: Cookies::new(),
            body: None,
        })
    }

    pub fn get(url: impl AsRef<str>) -> Result<Self> {
        Self::new(RequestMethod::Get, url)
    }

    pub fn post(url: impl AsRef<str>, body: impl Into<Vec<u8>>) -> Result<Self> {
        Ok(Self::new(RequestMethod::Post, url)?.with_body(body))
    }

    pub fn with_header(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.headers.set(key, value);
        self
    }

    pub fn with_cookie(mut self, cookie: CookieItem) -> Self {
        self.cookies.set(cookie);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }

    /// Applies headers and cookies a crawler requires for every request it
    /// handles. These win over what the command carried.
    pub fn apply_must(&mut self, must_headers: &Headers, must_cookies: &Cookies) {
        self.headers.merge(must_headers);
        self.cookies.merge(must_cookies);
    }
}

impl TryFrom<&CommandRequest> for Request {
    type Error = Error;

    fn try_from(command: &CommandRequest) -> Result<Self> {
        if command.url.trim().is_empty() {
            return Err(Error::invalid_argument("request url is empty"));
        }
        let url = Url::parse(command.url.trim())
            .map_err(|e| Error::invalid_argument(format!("invalid url {:?}: {e}", command.url)))?;
        let method = RequestMethod::try_from(command.method.as_str())?;

        let body = if method != RequestMethod::Get && !command.body.is_empty() {
            Some(command.body.clone().into_bytes())
        } else {
            None
        };

        let mut headers = Headers::from(&command.custom_headers);
        if !headers.contains("Referer") {
            if let Some(parent) = command.parent.as_ref().filter(|p| !p.url.is_empty()) {
                headers.set("Referer", &parent.url);
            }
        }

        let cookies = command
            .custom_cookies
            .iter()
            .filter(|c| c.matches_path(url.path()))
            .cloned()
            .collect();

        Ok(Request {
            method: method.to_string(),
            url,
            headers,
            cookies,
            body,
        })
    }
}
