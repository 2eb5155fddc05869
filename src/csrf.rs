use axum::{
    extract::Request,
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use uuid::Uuid;

use crate::error::AppError;

/// Cookie holding the anti-forgery token. Readable by scripts so clients can echo it.
pub const CSRF_COOKIE: &str = "csrftoken";
/// Header the token must be echoed in on unsafe methods.
pub const CSRF_HEADER: &str = "x-csrftoken";

/// csrf_protect
///
/// Double-submit cookie check applied to the whole router. Safe methods pass through;
/// POST, PUT, PATCH and DELETE need the `csrftoken` cookie echoed verbatim in the
/// `X-CSRFToken` header, otherwise the request is answered with 403 before routing,
/// authentication or body parsing happen.
pub async fn csrf_protect(jar: CookieJar, request: Request, next: Next) -> Response {
    if is_safe_method(request.method()) {
        return next.run(request).await;
    }

    let cookie_token = jar.get(CSRF_COOKIE).map(|c| c.value().to_string());
    let header_token = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    match (cookie_token, header_token) {
        (Some(cookie), Some(header)) if !cookie.is_empty() && tokens_match(&cookie, &header) => {
            next.run(request).await
        }
        (cookie, header) => {
            tracing::warn!(
                method = %request.method(),
                uri = %request.uri(),
                has_cookie = cookie.is_some(),
                has_header = header.is_some(),
                "CSRF verification failed"
            );
            AppError::Forbidden("CSRF verification failed".to_string()).into_response()
        }
    }
}

fn is_safe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

/// Compares without short-circuiting on the first differing byte.
fn tokens_match(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

pub fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

fn token_cookie(token: String) -> Cookie<'static> {
    Cookie::build((CSRF_COOKIE, token))
        .path("/")
        .same_site(SameSite::Lax)
        .build()
}

/// Returns the caller's current token, issuing one if the jar has none.
pub fn ensure_token(jar: CookieJar) -> (CookieJar, String) {
    match jar.get(CSRF_COOKIE).map(|c| c.value().to_string()) {
        Some(token) if !token.is_empty() => (jar, token),
        _ => rotate_token(jar),
    }
}

/// Always issues a fresh token. Used whenever the session identity changes.
pub fn rotate_token(jar: CookieJar) -> (CookieJar, String) {
    let token = new_token();
    (jar.add(token_cookie(token.clone())), token)
}
