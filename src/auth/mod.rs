use std::fmt;
use std::str::FromStr;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

pub const PRINCIPAL_ID_HEADER: &str = "x-principal-id";
pub const PRINCIPAL_ROLE_HEADER: &str = "x-principal-role";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Driver,
    Admin,
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "customer" => Ok(Role::Customer),
            "driver" => Ok(Role::Driver),
            "admin" => Ok(Role::Admin),
            other => Err(AppError::Unauthorized(format!("unknown role {other:?}"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Customer => "customer",
            Role::Driver => "driver",
            Role::Admin => "admin",
        };
        f.write_str(name)
    }
}

/// Authenticated caller as asserted by the identity layer in front of us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(parts, PRINCIPAL_ID_HEADER)?
            .parse::<Uuid>()
            .map_err(|err| AppError::Unauthorized(format!("invalid principal id: {err}")))?;
        let role = header(parts, PRINCIPAL_ROLE_HEADER)?.parse::<Role>()?;

        Ok(Principal { id, role })
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, AppError> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized(format!("missing {name} header")))
}

/// What an operation needs from its caller. Ownership of the entity involved
/// is checked by the operation itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    RequestRide,
    CancelRide,
    RateRide,
    ManageDriverProfile,
    ListRequestedRides,
    AcceptRide,
    UpdateRideStatus,
    ReportPosition,
    TrackRide,
    ViewRide,
    SearchDrivers,
}

impl Capability {
    fn allows(&self, role: Role) -> bool {
        use Capability::*;

        match self {
            RequestRide | CancelRide | RateRide => role == Role::Customer,
            ManageDriverProfile | ListRequestedRides | AcceptRide | UpdateRideStatus
            | ReportPosition => role == Role::Driver,
            TrackRide => matches!(role, Role::Customer | Role::Driver),
            ViewRide | SearchDrivers => true,
        }
    }
}

pub fn authorize(principal: &Principal, capability: Capability) -> Result<(), AppError> {
    if capability.allows(principal.role) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "{} may not perform {capability:?}",
            principal.role
        )))
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{authorize, Capability, Principal, Role};
    use crate::error::AppError;

    fn principal(role: Role) -> Principal {
        Principal {
            id: Uuid::new_v4(),
            role,
        }
    }

    #[test]
    fn customers_request_and_drivers_accept() {
        assert!(authorize(&principal(Role::Customer), Capability::RequestRide).is_ok());
        assert!(authorize(&principal(Role::Driver), Capability::AcceptRide).is_ok());

        let err = authorize(&principal(Role::Driver), Capability::RequestRide).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        let err = authorize(&principal(Role::Customer), Capability::AcceptRide).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn admins_only_view() {
        let admin = principal(Role::Admin);
        assert!(authorize(&admin, Capability::ViewRide).is_ok());
        assert!(authorize(&admin, Capability::TrackRide).is_err());
        assert!(authorize(&admin, Capability::RateRide).is_err());
    }

    #[test]
    fn role_parsing() {
        assert_eq!("Driver".parse::<Role>().unwrap(), Role::Driver);
        assert!("passenger".parse::<Role>().is_err());
    }
}
