//! Cookie parsing and `Set-Cookie` construction
//!
//! The API issues four cookies:
//! - `peak_sid`: opaque server-side session token (HttpOnly)
//! - `peak_token`: signed access token (HttpOnly)
//! - `csrf_token`: double-submit CSRF token (readable by the SPA)
//! - `peak_oauth_state`: OAuth `state` value for the Google flow (HttpOnly)

use std::fmt;
use std::str::FromStr;

use axum::http::{header::COOKIE, HeaderMap};

/// Server-side session cookie name
pub const SESSION_COOKIE: &str = "peak_sid";
/// Access token cookie name
pub const TOKEN_COOKIE: &str = "peak_token";
/// CSRF double-submit cookie name
pub const CSRF_COOKIE: &str = "csrf_token";
/// OAuth state cookie name
pub const OAUTH_STATE_COOKIE: &str = "peak_oauth_state";

/// `SameSite` cookie attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SameSite {
    #[default]
    Lax,
    Strict,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lax => "Lax",
            Self::Strict => "Strict",
            Self::None => "None",
        }
    }
}

impl FromStr for SameSite {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lax" => Ok(Self::Lax),
            "strict" => Ok(Self::Strict),
            "none" => Ok(Self::None),
            other => Err(format!(
                "expected 'lax', 'strict' or 'none', got '{}'",
                other
            )),
        }
    }
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attributes shared by every cookie the API sets
#[derive(Debug, Clone)]
pub struct CookieSettings {
    /// Add the `Secure` attribute
    pub secure: bool,
    /// `SameSite` attribute
    pub same_site: SameSite,
    /// Optional `Domain` attribute
    pub domain: Option<String>,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            secure: false,
            same_site: SameSite::Lax,
            domain: None,
        }
    }
}

impl CookieSettings {
    /// Build a `Set-Cookie` value
    pub fn build(&self, name: &str, value: &str, max_age_secs: i64, http_only: bool) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; Max-Age={}; SameSite={}",
            name,
            value,
            max_age_secs.max(0),
            self.same_site
        );

        if http_only {
            cookie.push_str("; HttpOnly");
        }
        // Browsers drop SameSite=None cookies without Secure
        if self.secure || self.same_site == SameSite::None {
            cookie.push_str("; Secure");
        }
        if let Some(ref domain) = self.domain {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }

        cookie
    }

    /// HttpOnly cookie, invisible to page scripts
    pub fn http_only(&self, name: &str, value: &str, max_age_secs: i64) -> String {
        self.build(name, value, max_age_secs, true)
    }

    /// Cookie readable from JavaScript (used for the CSRF token)
    pub fn readable(&self, name: &str, value: &str, max_age_secs: i64) -> String {
        self.build(name, value, max_age_secs, false)
    }

    /// Expire a cookie immediately
    pub fn clear(&self, name: &str) -> String {
        self.build(name, "", 0, true)
    }
}

/// Read a cookie value from the request headers
///
/// Looks through every `Cookie` header; empty values are treated as absent.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key.trim() == name).then(|| value.trim())
        })
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_get_cookie_finds_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; peak_sid=abc123; csrf_token=xyz"),
        );

        assert_eq!(get_cookie(&headers, SESSION_COOKIE), Some("abc123"));
        assert_eq!(get_cookie(&headers, CSRF_COOKIE), Some("xyz"));
        assert_eq!(get_cookie(&headers, TOKEN_COOKIE), None);
    }

    #[test]
    fn test_get_cookie_does_not_match_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("xpeak_sid=nope"));
        assert_eq!(get_cookie(&headers, SESSION_COOKIE), None);
    }

    #[test]
    fn test_get_cookie_across_multiple_headers() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("a=1"));
        headers.append(COOKIE, HeaderValue::from_static("peak_token=jwt"));
        assert_eq!(get_cookie(&headers, TOKEN_COOKIE), Some("jwt"));
    }

    #[test]
    fn test_get_cookie_empty_value_is_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("peak_sid="));
        assert_eq!(get_cookie(&headers, SESSION_COOKIE), None);
    }

    #[test]
    fn test_build_http_only_cookie() {
        let settings = CookieSettings {
            secure: true,
            same_site: SameSite::Strict,
            domain: Some("peakium.com".to_string()),
        };

        let cookie = settings.http_only(SESSION_COOKIE, "value", 3600);
        assert_eq!(
            cookie,
            "peak_sid=value; Path=/; Max-Age=3600; SameSite=Strict; HttpOnly; Secure; Domain=peakium.com"
        );
    }

    #[test]
    fn test_readable_cookie_has_no_http_only() {
        let settings = CookieSettings::default();
        let cookie = settings.readable(CSRF_COOKIE, "token", 60);
        assert!(!cookie.contains("HttpOnly"));
        assert!(!cookie.contains("Secure"));
        assert!(cookie.contains("SameSite=Lax"));
    }

    #[test]
    fn test_same_site_none_forces_secure() {
        let settings = CookieSettings {
            secure: false,
            same_site: SameSite::None,
            domain: None,
        };
        assert!(settings.readable(CSRF_COOKIE, "t", 60).contains("; Secure"));
    }

    #[test]
    fn test_clear_cookie() {
        let cookie = CookieSettings::default().clear(TOKEN_COOKIE);
        assert!(cookie.starts_with("peak_token=; Path=/; Max-Age=0"));
    }

    #[test]
    fn test_same_site_parsing() {
        assert_eq!("lax".parse::<SameSite>().unwrap(), SameSite::Lax);
        assert_eq!("Strict".parse::<SameSite>().unwrap(), SameSite::Strict);
        assert_eq!(" none ".parse::<SameSite>().unwrap(), SameSite::None);
        assert!("sometimes".parse::<SameSite>().is_err());
    }
}
