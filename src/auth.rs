//! Role checks for privileged operations.
//!
//! Admin operations change configuration and registrations, operators drive updates and
//! cache maintenance, the emergency role toggles emergency mode and pausers pause path
//! finding. [`crate::service::QuoteService`] resolves the role a request needs and calls
//! [`Authorizer::require`] before dispatching it.

use crate::errors::{QuoteError, QuoteResult};
use crate::settings::Roles;
use crate::types::conversions::string_to_address;
use dashmap::DashMap;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Operator,
    Emergency,
    Pauser,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Admin => "admin",
            Role::Operator => "operator",
            Role::Emergency => "emergency",
            Role::Pauser => "pauser",
        };
        f.write_str(name)
    }
}

pub trait Authorizer: Send + Sync {
    fn has_role(&self, caller: Address, role: Role) -> bool;

    fn require(&self, caller: Address, role: Role) -> QuoteResult<()> {
        if self.has_role(caller, role) {
            Ok(())
        } else {
            log::warn!("rejected {:?}: missing role {}", caller, role);
            Err(QuoteError::Unauthorized {
                caller: format!("{:?}", caller),
                role: role.to_string(),
            })
        }
    }
}

/// Grants every role to every caller. For embedded use where the host does its own checks.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn has_role(&self, _caller: Address, _role: Role) -> bool {
        true
    }
}

/// Explicit role table. Admins implicitly hold every role.
#[derive(Debug, Default)]
pub struct RoleAuthorizer {
    grants: DashMap<Role, HashSet<Address>>,
}

impl RoleAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the table from the `[service.roles]` config section.
    pub fn from_settings(roles: &Roles) -> QuoteResult<Self> {
        let auth = Self::new();
        let sections = [
            (Role::Admin, &roles.admins),
            (Role::Operator, &roles.operators),
            (Role::Emergency, &roles.emergency),
            (Role::Pauser, &roles.pausers),
        ];
        for (role, entries) in sections {
            for raw in entries {
                let addr = string_to_address(raw)
                    .map_err(|e| QuoteError::InvalidConfiguration(e.to_string()))?;
                auth.grant(role, addr);
            }
        }
        Ok(auth)
    }

    pub fn grant(&self, role: Role, who: Address) {
        self.grants.entry(role).or_default().insert(who);
    }

    pub fn revoke(&self, role: Role, who: Address) {
        if let Some(mut members) = self.grants.get_mut(&role) {
            members.remove(&who);
        }
    }
}

impl Authorizer for RoleAuthorizer {
    fn has_role(&self, caller: Address, role: Role) -> bool {
        let holds = |r: Role| {
            self.grants
                .get(&r)
                .map(|members| members.contains(&caller))
                .unwrap_or(false)
        };
        holds(role) || holds(Role::Admin)
    }
}

pub type SharedAuthorizer = Arc<dyn Authorizer>;
