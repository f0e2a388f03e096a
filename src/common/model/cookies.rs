use serde::{Deserialize, Serialize};
use std::fmt;

/// A cookie as carried on the wire. Validity (expiry, domain) is the
/// gateway's concern; the node only filters by path and forwards.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CookieItem {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Unix timestamp seconds
    pub expires: Option<i64>,
    pub secure: bool,
    #[serde(rename = "httpOnly")]
    pub http_only: bool,
}

impl fmt::Debug for CookieItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieItem")
            .field("name", &self.name)
            .field("value", &"***REDACTED***")
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("expires", &self.expires)
            .field("secure", &self.secure)
            .field("http_only", &self.http_only)
            .finish()
    }
}

impl CookieItem {
    pub fn new(name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        CookieItem {
            name: name.as_ref().into(),
            value: value.as_ref().into(),
            ..Default::default()
        }
    }

    pub fn with_domain(mut self, domain: impl AsRef<str>) -> Self {
        self.domain = domain.as_ref().into();
        self
    }

    pub fn with_path(mut self, path: impl AsRef<str>) -> Self {
        self.path = path.as_ref().into();
        self
    }

    /// Path-prefix match against a request path. An empty or `/` cookie path
    /// matches every request.
    pub fn matches_path(&self, request_path: &str) -> bool {
        let path = self.path.trim();
        if path.is_empty() || path == "/" {
            return true;
        }
        request_path.starts_with(path)
    }
}

#[derive(Default, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Cookies {
    pub cookies: Vec<CookieItem>,
}

impl Cookies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `cookie`, replacing one with the same name, domain and path.
    pub fn set(&mut self, cookie: CookieItem) {
        if let Some(existing) = self
            .cookies
            .iter_mut()
            .find(|c| c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path)
        {
            *existing = cookie;
        } else {
            self.cookies.push(cookie);
        }
    }

    pub fn add(&mut self, name: impl AsRef<str>, value: impl AsRef<str>, domain: impl AsRef<str>) {
        self.set(CookieItem::new(name, value).with_domain(domain));
    }

    pub fn merge(&mut self, other: &Cookies) {
        for cookie in &other.cookies {
            self.set(cookie.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn get(&self, name: impl AsRef<str>) -> Option<&CookieItem> {
        self.cookies.iter().find(|c| c.name == name.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &CookieItem> {
        self.cookies.iter()
    }

    /// Renders a `Cookie` request header value.
    pub fn header_value(&self) -> String {
        self.cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<String>>()
            .join("; ")
    }
}

impl FromIterator<CookieItem> for Cookies {
    fn from_iter<T: IntoIterator<Item = CookieItem>>(iter: T) -> Self {
        let mut cookies = Cookies::new();
        for cookie in iter {
            cookies.set(cookie);
        }
        cookies
    }
}
