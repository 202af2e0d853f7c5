use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};

use furrow_types::api::Claims;

use crate::state::AppState;

/// Decode and validate an HS256 token. Any failure is a 401.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, StatusCode> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;

    if token_data.claims.sub.trim().is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(token_data.claims)
}

/// Sign a token for `user_id`. Accounts live elsewhere; this is for
/// development setups and tests.
pub fn issue_token(
    secret: &str,
    user_id: &str,
    valid_for: chrono::Duration,
) -> jsonwebtoken::errors::Result<String> {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (chrono::Utc::now() + valid_for).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Extract and validate the JWT from the Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(StatusCode::UNAUTHORIZED)?;
    let claims = verify_token(&state.jwt_secret, bearer.token())?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies() {
        let token = issue_token("s3cret", "u1", chrono::Duration::minutes(5)).unwrap();
        let claims = verify_token("s3cret", &token).unwrap();
        assert_eq!(claims.sub, "u1");
    }

    #[test]
    fn wrong_secret_or_expired_is_unauthorized() {
        let token = issue_token("s3cret", "u1", chrono::Duration::minutes(5)).unwrap();
        assert_eq!(verify_token("other", &token).unwrap_err(), StatusCode::UNAUTHORIZED);

        // Past the default 60s leeway
        let stale = issue_token("s3cret", "u1", chrono::Duration::minutes(-10)).unwrap();
        assert_eq!(verify_token("s3cret", &stale).unwrap_err(), StatusCode::UNAUTHORIZED);

        assert_eq!(verify_token("s3cret", "not-a-jwt").unwrap_err(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn blank_subject_is_rejected() {
        let token = issue_token("s3cret", "  ", chrono::Duration::minutes(5)).unwrap();
        assert!(verify_token("s3cret", &token).is_err());
    }
}
