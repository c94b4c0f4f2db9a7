use uuid::Uuid;

use crate::{domain::Lease, error::AppError, state::AppState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseRole {
    Landlord,
    Tenant,
}

impl LeaseRole {
    fn label(self) -> &'static str {
        match self {
            Self::Landlord => "landlord",
            Self::Tenant => "tenant",
        }
    }
}

pub async fn get_lease(state: &AppState, lease_id: Uuid) -> Result<Lease, AppError> {
    state
        .store
        .get_lease(lease_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Lease {lease_id} was not found.")))
}

/// Landlord or tenant of the lease.
pub async fn assert_lease_party(
    state: &AppState,
    user_id: Uuid,
    lease_id: Uuid,
) -> Result<Lease, AppError> {
    let lease = get_lease(state, lease_id).await?;
    if lease.is_party(user_id) {
        return Ok(lease);
    }
    Err(AppError::Forbidden(
        "Forbidden: not a party to this lease.".to_string(),
    ))
}

pub async fn assert_lease_role(
    state: &AppState,
    user_id: Uuid,
    lease_id: Uuid,
    role: LeaseRole,
) -> Result<Lease, AppError> {
    let lease = assert_lease_party(state, user_id, lease_id).await?;
    let holder = match role {
        LeaseRole::Landlord => lease.landlord_id,
        LeaseRole::Tenant => lease.tenant_id,
    };
    if holder == user_id {
        return Ok(lease);
    }
    Err(AppError::Forbidden(format!(
        "Forbidden: only the lease's {} can do this.",
        role.label()
    )))
}
