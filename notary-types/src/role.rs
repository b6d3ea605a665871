use serde::{Deserialize, Serialize};
use std::fmt;

/// One of TUF's base roles, or a `targets/<path>` delegation.
///
/// Base roles serialize in kebab-case to match the TUF spec's `_type` field; delegations
/// serialize as the literal `targets/<path>` string they were constructed with.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum RoleType {
    Root,
    Targets,
    Snapshot,
    Timestamp,
    Delegation(String),
}

impl RoleType {
    /// The name as it appears on the wire and in storage (`gun`, `role`) tuples.
    pub fn name(&self) -> String {
        match self {
            RoleType::Root => "root".to_string(),
            RoleType::Targets => "targets".to_string(),
            RoleType::Snapshot => "snapshot".to_string(),
            RoleType::Timestamp => "timestamp".to_string(),
            RoleType::Delegation(path) => format!("targets/{}", path),
        }
    }

    /// Parses a role name as it would appear in storage or in a URL path segment.
    pub fn parse(name: &str) -> RoleType {
        match name {
            "root" => RoleType::Root,
            "targets" => RoleType::Targets,
            "snapshot" => RoleType::Snapshot,
            "timestamp" => RoleType::Timestamp,
            other => {
                if let Some(path) = other.strip_prefix("targets/") {
                    RoleType::Delegation(path.to_string())
                } else {
                    RoleType::Delegation(other.to_string())
                }
            }
        }
    }

    /// Whether this role is one of the four base TUF roles (not a delegation).
    pub fn is_base(&self) -> bool {
        !matches!(self, RoleType::Delegation(_))
    }

    /// The immediate parent's role, for delegations nested one level under `targets`.
    pub fn delegation_parent(&self) -> Option<RoleType> {
        match self {
            RoleType::Delegation(path) => match path.rsplit_once('/') {
                Some((parent, _)) => Some(RoleType::Delegation(parent.to_string())),
                None => Some(RoleType::Targets),
            },
            _ => None,
        }
    }
}

impl fmt::Display for RoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for RoleType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.name())
    }
}

impl<'de> Deserialize<'de> for RoleType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(RoleType::parse(&s))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_base_roles() {
        for role in [
            RoleType::Root,
            RoleType::Targets,
            RoleType::Snapshot,
            RoleType::Timestamp,
        ] {
            assert_eq!(RoleType::parse(&role.name()), role);
        }
    }

    #[test]
    fn delegation_name_and_parent() {
        let d = RoleType::parse("targets/releases/stable");
        assert_eq!(d.name(), "targets/releases/stable");
        assert_eq!(
            d.delegation_parent(),
            Some(RoleType::Delegation("releases".to_string()))
        );
    }

    #[test]
    fn top_level_delegation_parent_is_targets() {
        let d = RoleType::parse("targets/releases");
        assert_eq!(d.delegation_parent(), Some(RoleType::Targets));
    }
}
