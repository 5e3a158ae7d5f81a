//! Request extractors for the authenticated caller.

use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::session,
    db::{errors::DbError, handlers::Users},
    errors::{Error, Result},
    types::Operation,
};
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use tracing::{debug, instrument, trace};

/// Where the presented token came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Header,
    Cookie,
}

/// Pull the access token out of a request.
///
/// An `Authorization: Bearer` header wins whenever present, even if the token in it turns out to
/// be invalid; the cookie is only consulted when there is no bearer header.
pub fn extract_token<'a>(headers: &'a HeaderMap, cookie_name: &str) -> Option<(&'a str, TokenSource)> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.trim())
        .filter(|token| !token.is_empty());
    if let Some(token) = bearer {
        return Some((token, TokenSource::Header));
    }

    // Several Cookie headers may be present
    for cookie_header in headers.get_all(header::COOKIE) {
        let Ok(cookie_str) = cookie_header.to_str() else {
            continue;
        };
        for cookie in cookie_str.split(';') {
            let Some((name, value)) = cookie.trim().split_once('=') else {
                continue;
            };
            if name != cookie_name {
                continue;
            }
            let value = value.trim_matches('"');
            let value = value.strip_prefix("Bearer ").unwrap_or(value).trim();
            if !value.is_empty() {
                return Some((value, TokenSource::Cookie));
            }
        }
    }
    None
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let Some((token, source)) = extract_token(&parts.headers, &state.config.auth.cookie_name) else {
            trace!("No access token presented");
            return Err(Error::Unauthenticated { message: None });
        };

        let email = session::verify_session_token(token, &state.config).inspect_err(|e| {
            trace!(?source, "Access token rejected: {e}");
        })?;

        let mut conn = state.db.acquire().await.map_err(DbError::from)?;
        let user = Users::new(&mut conn).get_user_by_email(&email).await?;

        match user {
            Some(user) => {
                debug!(user_id = user.id, ?source, "Authenticated user");
                Ok(CurrentUser::from(user))
            }
            // Token was valid but the account no longer exists
            None => Err(Error::Unauthenticated { message: None }),
        }
    }
}

/// An authenticated caller holding the attorney role
#[derive(Debug, Clone)]
pub struct CurrentAttorney(pub CurrentUser);

impl FromRequestParts<AppState> for CurrentAttorney {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_attorney() {
            debug!(user_id = user.id, "Attorney role required");
            return Err(Error::InsufficientPermissions {
                action: operation_for(parts),
                resource: "leads".to_string(),
            });
        }
        Ok(CurrentAttorney(user))
    }
}

fn operation_for(parts: &Parts) -> Operation {
    match parts.method.as_str() {
        "POST" => Operation::Create,
        "PATCH" | "PUT" => Operation::Update,
        _ if parts.uri.path().trim_end_matches('/').ends_with("/leads") => Operation::ReadAll,
        _ => Operation::Read,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_no_credentials() {
        assert!(extract_token(&HeaderMap::new(), "access_token").is_none());
    }

    #[test]
    fn test_bearer_header() {
        let h = headers(&[(header::AUTHORIZATION, "Bearer abc.def.ghi")]);
        assert_eq!(extract_token(&h, "access_token"), Some(("abc.def.ghi", TokenSource::Header)));

        let h = headers(&[(header::AUTHORIZATION, "bearer abc")]);
        assert_eq!(extract_token(&h, "access_token"), Some(("abc", TokenSource::Header)));
    }

    #[test]
    fn test_cookie_fallback() {
        let h = headers(&[(header::COOKIE, "theme=dark; access_token=tok123; other=1")]);
        assert_eq!(extract_token(&h, "access_token"), Some(("tok123", TokenSource::Cookie)));

        let h = headers(&[(header::COOKIE, "access_token=\"Bearer tok456\"")]);
        assert_eq!(extract_token(&h, "access_token"), Some(("tok456", TokenSource::Cookie)));
    }

    #[test]
    fn test_header_takes_precedence_over_cookie() {
        let h = headers(&[
            (header::AUTHORIZATION, "Bearer from-header"),
            (header::COOKIE, "access_token=from-cookie"),
        ]);
        assert_eq!(extract_token(&h, "access_token"), Some(("from-header", TokenSource::Header)));
    }

    #[test]
    fn test_non_bearer_scheme_falls_back_to_cookie() {
        let h = headers(&[
            (header::AUTHORIZATION, "Basic dXNlcjpwYXNz"),
            (header::COOKIE, "access_token=from-cookie"),
        ]);
        assert_eq!(extract_token(&h, "access_token"), Some(("from-cookie", TokenSource::Cookie)));
    }

    #[test]
    fn test_cookie_name_must_match_exactly() {
        let h = headers(&[(header::COOKIE, "x_access_token=nope; access_token_old=nope")]);
        assert!(extract_token(&h, "access_token").is_none());

        let h = headers(&[(header::COOKIE, "access_token=")]);
        assert!(extract_token(&h, "access_token").is_none());
    }
}
