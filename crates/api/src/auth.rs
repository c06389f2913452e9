//! Caller identity extractor.
//!
//! Authentication happens upstream; the gateway in front of this service
//! forwards the verified identity as `x-user-id`, `x-user-email` and
//! `x-user-role` headers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::UserId;
use workflow::Buyer;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Role carried by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
    SuperAdmin,
}

impl Role {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            "super_admin" => Some(Role::SuperAdmin),
            _ => None,
        }
    }
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: UserId,
    pub email: Option<String>,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin | Role::SuperAdmin)
    }

    /// Rejects callers without an admin role.
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "admin role required for this action".to_string(),
            ))
        }
    }

    /// The caller as a checkout buyer. Requires an email.
    pub fn buyer(&self) -> Result<Buyer, ApiError> {
        let email = self
            .email
            .clone()
            .ok_or_else(|| ApiError::BadRequest(format!("{USER_EMAIL_HEADER} header required")))?;
        Ok(Buyer { id: self.id, email })
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw_id = header(parts, USER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("{USER_ID_HEADER} header required")))?;
        let id = UserId::parse(raw_id)
            .map_err(|e| ApiError::Unauthorized(format!("Invalid user id: {e}")))?;

        let role = match header(parts, USER_ROLE_HEADER) {
            None => Role::User,
            Some(raw) => Role::parse(raw)
                .ok_or_else(|| ApiError::Unauthorized(format!("Unknown role: {raw}")))?,
        };

        Ok(Self {
            id,
            email: header(parts, USER_EMAIL_HEADER).map(String::from),
            role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Result<AuthUser, ApiError> {
        let (mut parts, _) = request.into_parts();
        AuthUser::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_extracts_identity() {
        let id = UserId::new();
        let request = Request::builder()
            .header(USER_ID_HEADER, id.to_string())
            .header(USER_EMAIL_HEADER, "admin@example.com")
            .header(USER_ROLE_HEADER, "super_admin")
            .body(())
            .unwrap();

        let user = extract(request).await.unwrap();
        assert_eq!(user.id, id);
        assert!(user.is_admin());
        assert_eq!(user.buyer().unwrap().email, "admin@example.com");
    }

    #[tokio::test]
    async fn test_missing_or_bad_identity_rejected() {
        let request = Request::builder().body(()).unwrap();
        assert!(matches!(extract(request).await, Err(ApiError::Unauthorized(_))));

        let request = Request::builder()
            .header(USER_ID_HEADER, "not-a-uuid")
            .body(())
            .unwrap();
        assert!(matches!(extract(request).await, Err(ApiError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_default_role_is_user() {
        let request = Request::builder()
            .header(USER_ID_HEADER, UserId::new().to_string())
            .body(())
            .unwrap();
        let user = extract(request).await.unwrap();
        assert_eq!(user.role, Role::User);
        assert!(user.require_admin().is_err());
        assert!(user.buyer().is_err());
    }
}
