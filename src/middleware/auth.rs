use axum::{extract::FromRequestParts, http::request::Parts};
use sea_orm::EntityTrait;
use uuid::Uuid;

use crate::{
    entity::{Users, users},
    error::AppError,
    session::{token_from_headers, verify_token},
    state::AppState,
};

/// Identity resolved from the session cookie (or bearer header) of a request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub is_admin: bool,
}

impl From<users::Model> for AuthUser {
    fn from(model: users::Model) -> Self {
        Self {
            user_id: model.id,
            name: model.name,
            email: model.email,
            phone: model.phone,
            is_admin: model.is_admin,
        }
    }
}

pub fn ensure_admin(user: &AuthUser) -> Result<(), AppError> {
    if !user.is_admin {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = token_from_headers(&parts.headers).ok_or(AppError::Unauthenticated)?;
        let user_id =
            verify_token(&state.config.jwt_secret, &token).ok_or(AppError::Unauthenticated)?;

        // A valid token for a deleted account is treated as no session.
        let user = Users::find_by_id(user_id)
            .one(&state.orm)
            .await?
            .ok_or(AppError::Unauthenticated)?;

        Ok(user.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(is_admin: bool) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            phone: None,
            is_admin,
        }
    }

    #[test]
    fn only_admins_pass_admin_check() {
        assert!(ensure_admin(&user(true)).is_ok());
        assert!(matches!(ensure_admin(&user(false)), Err(AppError::Forbidden)));
    }
}
