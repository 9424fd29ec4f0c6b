use serde::{Deserialize, Serialize};

/// The closed set of roles this subsystem understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A regular account.
    #[default]
    User,
    /// A nutritionist, allowed to reply to reviews.
    Nutritionist,
    /// An administrator.
    Administrator,
}

impl Role {
    /// The wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Nutritionist => "nutritionist",
            Role::Administrator => "administrator",
        }
    }

    /// Parses a wire name; unknown names come back `None`.
    pub fn parse(name: &str) -> Option<Role> {
        match name {
            "user" => Some(Role::User),
            "nutritionist" => Some(Role::Nutritionist),
            "administrator" => Some(Role::Administrator),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role-related claims read from an identity-provider token.
///
/// This subsystem only reads these; issuing and validating the token is the
/// identity provider's business.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleClaims {
    /// An explicit role claim.
    pub role: Option<String>,
    /// A list of role names.
    pub roles: Option<Vec<String>>,
    /// A boolean administrator marker.
    pub admin: Option<bool>,
}

/// Resolves the effective role from a stored account role and external
/// token claims.
///
/// Claims win over the stored role, in this order: an explicit `role` claim,
/// then an `administrator` entry in the `roles` list, then `admin == true`,
/// then the account's own role, then the `user` default. An explicit claim
/// naming an unknown role falls through to the next rule.
pub fn resolve_role(account_role: Option<Role>, claims: &RoleClaims) -> Role {
    if let Some(role) = claims.role.as_deref().and_then(Role::parse) {
        return role;
    }
    if claims
        .roles
        .as_ref()
        .is_some_and(|roles| roles.iter().any(|r| r == "administrator"))
    {
        return Role::Administrator;
    }
    if claims.admin == Some(true) {
        return Role::Administrator;
    }
    account_role.unwrap_or_default()
}
