use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderItem {
    pub key: String,
    pub value: String,
}

impl fmt::Debug for HeaderItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key_lower = self.key.to_lowercase();
        let value = if key_lower.contains("auth")
            || key_lower.contains("cookie")
            || key_lower.contains("secret")
            || key_lower.contains("token")
        {
            "***REDACTED***"
        } else {
            &self.value
        };

        f.debug_struct("HeaderItem")
            .field("key", &self.key)
            .field("value", &value)
            .finish()
    }
}

/// Ordered header list; keys compare case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
    pub headers: Vec<HeaderItem>,
}

impl Headers {
    pub fn new() -> Self {
        Headers {
            headers: Vec::new(),
        }
    }

    /// Sets `key`, replacing an existing value of the same name.
    pub fn add(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl AsRef<str>, value: impl AsRef<str>) {
        if let Some(v) = self
            .headers
            .iter_mut()
            .find(|h| h.key.eq_ignore_ascii_case(key.as_ref()))
        {
            v.value = value.as_ref().into();
        } else {
            self.headers.push(HeaderItem {
                key: key.as_ref().into(),
                value: value.as_ref().into(),
            })
        }
    }

    /// Overlays `other` on top of `self`; keys present in both take `other`'s value.
    pub fn merge(&mut self, other: &Headers) {
        for header_item in &other.headers {
            self.set(&header_item.key, &header_item.value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn contains(&self, key: impl AsRef<str>) -> bool {
        self.headers
            .iter()
            .any(|header_item| header_item.key.eq_ignore_ascii_case(key.as_ref()))
    }

    pub fn get(&self, key: impl AsRef<str>) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.key.eq_ignore_ascii_case(key.as_ref()))
            .map(|h| h.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(|h| (h.key.as_str(), h.value.as_str()))
    }
}

impl From<&BTreeMap<String, String>> for Headers {
    fn from(value: &BTreeMap<String, String>) -> Self {
        let mut headers = Headers::new();
        for (key, value) in value {
            headers.set(key, value);
        }
        headers
    }
}

impl From<&Headers> for BTreeMap<String, String> {
    fn from(value: &Headers) -> Self {
        value
            .headers
            .iter()
            .map(|h| (h.key.clone(), h.value.clone()))
            .collect()
    }
}

impl From<&Headers> for HeaderMap {
    fn from(value: &Headers) -> Self {
        let mut header_map = HeaderMap::new();

        for header_item in &value.headers {
            match (
                header_item.key.parse::<HeaderName>(),
                HeaderValue::from_str(&header_item.value),
            ) {
                (Ok(name), Ok(value)) => {
                    // Multi-value headers are appended, everything else overwrites.
                    if matches!(
                        name.as_str(),
                        "accept" | "accept-encoding" | "accept-language" | "cache-control"
                            | "forwarded" | "x-forwarded-for" | "via"
                    ) {
                        header_map.append(name, value);
                    } else {
                        header_map.insert(name, value);
                    }
                }
                _ => continue,
            }
        }

        header_map
    }
}

impl From<&HeaderMap> for Headers {
    fn from(value: &HeaderMap) -> Self {
        let headers = value
            .iter()
            .map(|(key, value)| HeaderItem {
                key: key.as_str().to_string(),
                value: value.to_str().unwrap_or("").to_string(),
            })
            .collect();

        Headers { headers }
    }
}
