//! Cookie side of the trust record.

use std::collections::HashMap;

use axum::http::{
    HeaderMap, HeaderValue,
    header::{COOKIE, SET_COOKIE},
};
use chrono::{DateTime, Utc};

use super::storage::StorageError;

const EXPIRES_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
}

impl SameSite {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
        }
    }
}

/// A `Set-Cookie` instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub expires: Option<DateTime<Utc>>,
    pub max_age: Option<i64>,
    pub same_site: SameSite,
    pub secure: bool,
    pub http_only: bool,
}

impl SetCookie {
    /// Cookie readable by the edge gate: strict same-site, secure transport only.
    #[must_use]
    pub fn strict(name: &str, value: &str, expires: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            expires: Some(expires),
            max_age: None,
            same_site: SameSite::Strict,
            secure: true,
            http_only: false,
        }
    }

    /// Instruction that removes `name` immediately with an already-past expiry.
    #[must_use]
    pub fn expired(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: String::new(),
            expires: Some(DateTime::<Utc>::UNIX_EPOCH),
            max_age: Some(0),
            same_site: SameSite::Strict,
            secure: true,
            http_only: false,
        }
    }

    #[must_use]
    pub fn is_removal(&self) -> bool {
        self.max_age == Some(0)
    }

    #[must_use]
    pub fn to_header_string(&self) -> String {
        let mut cookie = format!("{}={}; Path=/", self.name, self.value);
        if let Some(expires) = self.expires {
            cookie.push_str("; Expires=");
            cookie.push_str(&expires.format(EXPIRES_FORMAT).to_string());
        }
        if let Some(max_age) = self.max_age {
            cookie.push_str(&format!("; Max-Age={max_age}"));
        }
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        cookie.push_str("; SameSite=");
        cookie.push_str(self.same_site.as_str());
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

pub trait CookieJar {
    fn get(&self, name: &str) -> Option<String>;

    /// # Errors
    /// Returns [`StorageError`] when the cookie cannot be written.
    fn set(&mut self, cookie: SetCookie) -> Result<(), StorageError>;
}

/// In-process jar that behaves like a browser for a single origin.
#[derive(Clone, Debug, Default)]
pub struct MemoryCookieJar {
    values: HashMap<String, String>,
    written: Vec<SetCookie>,
}

impl MemoryCookieJar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `Set-Cookie` instruction received, oldest first.
    #[must_use]
    pub fn written(&self) -> &[SetCookie] {
        &self.written
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.values.insert(name.to_string(), value.to_string());
    }
}

impl CookieJar for MemoryCookieJar {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }

    fn set(&mut self, cookie: SetCookie) -> Result<(), StorageError> {
        if cookie.is_removal() {
            self.values.remove(&cookie.name);
        } else {
            self.values.insert(cookie.name.clone(), cookie.value.clone());
        }
        self.written.push(cookie);
        Ok(())
    }
}

/// Cookies of one HTTP exchange: parsed from the request, written as `Set-Cookie`.
#[derive(Clone, Debug, Default)]
pub struct RequestCookies {
    values: HashMap<String, String>,
    pending: Vec<HeaderValue>,
}

impl RequestCookies {
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut values = HashMap::new();
        for header in headers.get_all(COOKIE) {
            let Ok(raw) = header.to_str() else {
                continue;
            };
            for (name, value) in parse_cookie_pairs(raw) {
                values.entry(name.to_string()).or_insert_with(|| value.to_string());
            }
        }
        Self {
            values,
            pending: Vec::new(),
        }
    }

    #[must_use]
    pub fn set_cookie_headers(&self) -> &[HeaderValue] {
        &self.pending
    }

    /// Append the collected `Set-Cookie` headers to a response.
    pub fn apply(self, headers: &mut HeaderMap) {
        for value in self.pending {
            headers.append(SET_COOKIE, value);
        }
    }
}

impl CookieJar for RequestCookies {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }

    fn set(&mut self, cookie: SetCookie) -> Result<(), StorageError> {
        let value = HeaderValue::from_str(&cookie.to_header_string()).map_err(|_| {
            StorageError::InvalidCookie {
                name: cookie.name.clone(),
            }
        })?;
        if cookie.is_removal() {
            self.values.remove(&cookie.name);
        } else {
            self.values.insert(cookie.name, cookie.value);
        }
        self.pending.push(value);
        Ok(())
    }
}

/// Read a single cookie from the request `Cookie` headers.
#[must_use]
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(parse_cookie_pairs)
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn parse_cookie_pairs(raw: &str) -> impl Iterator<Item = (&str, &str)> {
    raw.split(';').filter_map(|pair| {
        let mut parts = pair.trim().splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key.is_empty() { None } else { Some((key, val)) }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn strict_cookie_has_trust_attributes() {
        let expires = Utc.with_ymd_and_hms(2026, 2, 3, 4, 5, 6).single();
        let Some(expires) = expires else {
            panic!("valid timestamp");
        };
        let header = SetCookie::strict("device_trust", "abc", expires).to_header_string();
        assert_eq!(
            header,
            "device_trust=abc; Path=/; Expires=Tue, 03 Feb 2026 04:05:06 GMT; SameSite=Strict; Secure"
        );
    }

    #[test]
    fn expired_cookie_is_in_the_past() {
        let header = SetCookie::expired("device_trust").to_header_string();
        assert!(header.starts_with("device_trust=; Path=/"));
        assert!(header.contains("Expires=Thu, 01 Jan 1970 00:00:00 GMT"));
        assert!(header.contains("Max-Age=0"));
    }

    #[test]
    fn request_cookies_parse_and_collect() -> Result<(), StorageError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("folio_session=abc; device_trust=tok"),
        );
        let mut jar = RequestCookies::from_headers(&headers);
        assert_eq!(jar.get("device_trust"), Some("tok".to_string()));
        assert_eq!(jar.get("missing"), None);

        jar.set(SetCookie::expired("device_trust"))?;
        assert_eq!(jar.get("device_trust"), None);
        assert_eq!(jar.set_cookie_headers().len(), 1);

        let mut response_headers = HeaderMap::new();
        jar.apply(&mut response_headers);
        assert_eq!(response_headers.get_all(SET_COOKIE).iter().count(), 1);
        Ok(())
    }

    #[test]
    fn cookie_value_skips_empty_values() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("a=; b=2"));
        assert_eq!(cookie_value(&headers, "a"), None);
        assert_eq!(cookie_value(&headers, "b"), Some("2".to_string()));
    }

    #[test]
    fn memory_jar_removes_on_expired_cookie() -> Result<(), StorageError> {
        let mut jar = MemoryCookieJar::new();
        jar.insert("device_trust", "tok");
        jar.set(SetCookie::expired("device_trust"))?;
        assert_eq!(jar.get("device_trust"), None);
        assert_eq!(jar.written().len(), 1);
        Ok(())
    }
}
