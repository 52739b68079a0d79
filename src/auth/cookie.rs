//! Session cookie parsing and rendering.

use std::time::Duration;

use axum::http::{HeaderMap, Uri, header};

/// Cookie carrying the session token.
pub const AUTH_COOKIE_NAME: &str = "authToken";

/// Extract a cookie value from the Cookie header.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    for cookie_header in headers.get_all(header::COOKIE) {
        let Ok(cookie_header) = cookie_header.to_str() else {
            continue;
        };
        for part in cookie_header.split(';') {
            let part = part.trim();
            if let Some((key, value)) = part.split_once('=') {
                if key.trim() == name {
                    return Some(value.trim());
                }
            }
        }
    }
    None
}

/// Whether the request reached us over https, directly or through a proxy.
pub fn is_secure_request(headers: &HeaderMap, uri: &Uri) -> bool {
    if uri.scheme_str() == Some("https") {
        return true;
    }
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("https"))
        .unwrap_or(false)
}

/// `Set-Cookie` value carrying a session token.
pub fn session_cookie(token: &str, max_age: Duration, secure: bool) -> String {
    let secure = if secure { "; Secure" } else { "" };
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}{}",
        AUTH_COOKIE_NAME,
        token,
        max_age.as_secs(),
        secure
    )
}

/// `Set-Cookie` value that clears the session cookie.
pub fn clear_session_cookie(secure: bool) -> String {
    let secure = if secure { "; Secure" } else { "" };
    format!(
        "{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0{}",
        AUTH_COOKIE_NAME, secure
    )
}

/// Whether a response already sets the session cookie.
pub fn sets_session_cookie(headers: &HeaderMap) -> bool {
    let prefix = format!("{}=", AUTH_COOKIE_NAME);
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.starts_with(&prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_get_cookie_simple() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("authToken=abc123"));

        assert_eq!(get_cookie(&headers, "authToken"), Some("abc123"));
    }

    #[test]
    fn test_get_cookie_multiple() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("foo=bar; authToken=abc123; theme=dark"),
        );

        assert_eq!(get_cookie(&headers, "authToken"), Some("abc123"));
        assert_eq!(get_cookie(&headers, "theme"), Some("dark"));
        assert_eq!(get_cookie(&headers, "foo"), Some("bar"));
    }

    #[test]
    fn test_get_cookie_not_found() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("foo=bar"));

        assert_eq!(get_cookie(&headers, "authToken"), None);
        assert_eq!(get_cookie(&HeaderMap::new(), "authToken"), None);
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session_cookie("tok", Duration::from_secs(60), true);
        assert_eq!(
            cookie,
            "authToken=tok; HttpOnly; SameSite=Strict; Path=/; Max-Age=60; Secure"
        );

        let cookie = session_cookie("tok", Duration::from_secs(60), false);
        assert!(!cookie.contains("Secure"));
    }

    #[test]
    fn test_clear_cookie_has_empty_value() {
        let cookie = clear_session_cookie(false);
        assert!(cookie.starts_with("authToken=;"));
        assert!(cookie.contains("Max-Age=0"));
    }

    #[test]
    fn test_is_secure_request() {
        let uri: Uri = "https://example.com/api".parse().unwrap();
        assert!(is_secure_request(&HeaderMap::new(), &uri));

        let uri: Uri = "/api".parse().unwrap();
        assert!(!is_secure_request(&HeaderMap::new(), &uri));

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        assert!(is_secure_request(&headers, &uri));
    }
}
