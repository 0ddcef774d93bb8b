//! Caller identity taken from boundary headers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::UserId;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Customer,
    Admin,
}

/// Who is calling, as asserted by the gateway in front of this service.
///
/// Both headers are optional. A missing or unrecognized role is a customer.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: Option<UserId>,
    pub role: Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admins see everything; customers see records they own and
    /// records nobody owns.
    pub fn may_access(&self, owner: Option<&UserId>) -> bool {
        match owner {
            _ if self.is_admin() => true,
            None => true,
            Some(owner) => self.user_id.as_ref() == Some(owner),
        }
    }

    /// The user a customer's listing is pinned to.
    pub fn scope(&self) -> Result<Option<UserId>, ApiError> {
        if self.is_admin() {
            return Ok(None);
        }
        self.user_id
            .clone()
            .map(Some)
            .ok_or_else(|| ApiError::BadRequest(format!("{USER_ID_HEADER} header is required")))
    }

    /// Name recorded on reviews made by this caller.
    pub fn reviewer(&self) -> String {
        self.user_id
            .as_ref()
            .map_or_else(|| "admin".to_string(), ToString::to_string)
    }
}

fn header(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let role = match header(parts, USER_ROLE_HEADER) {
            Some(role) if role.eq_ignore_ascii_case("admin") => Role::Admin,
            _ => Role::Customer,
        };
        Ok(Caller {
            user_id: header(parts, USER_ID_HEADER).map(UserId::from),
            role,
        })
    }
}

/// A caller holding the admin role. Rejects everyone else with 403.
#[derive(Debug, Clone)]
pub struct Admin(pub Caller);

impl<S> FromRequestParts<S> for Admin
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let caller = Caller::from_request_parts(parts, state).await?;
        if !caller.is_admin() {
            return Err(ApiError::Forbidden("admin role required".into()));
        }
        Ok(Admin(caller))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(id: &str) -> Caller {
        Caller {
            user_id: Some(UserId::from(id)),
            role: Role::Customer,
        }
    }

    #[test]
    fn customers_only_reach_their_own_records() {
        let alice = customer("alice");
        assert!(alice.may_access(Some(&UserId::from("alice"))));
        assert!(!alice.may_access(Some(&UserId::from("bob"))));
        assert!(alice.may_access(None));
    }

    #[test]
    fn admins_reach_everything_and_are_unscoped() {
        let admin = Caller {
            user_id: None,
            role: Role::Admin,
        };
        assert!(admin.may_access(Some(&UserId::from("bob"))));
        assert!(admin.scope().unwrap().is_none());
        assert_eq!(admin.reviewer(), "admin");
    }

    #[test]
    fn anonymous_customers_cannot_list() {
        let anonymous = Caller {
            user_id: None,
            role: Role::Customer,
        };
        assert!(matches!(anonymous.scope(), Err(ApiError::BadRequest(_))));
    }
}
