use crate::error::{self, Result};
use serde::{Deserialize, Serialize};
use snafu::ensure;
use std::fmt;

/// A globally unique name: the namespace a trusted collection of metadata is published under.
///
/// Opaque from this crate's point of view; callers typically use a container image repository
/// path like `docker.io/library/alpine`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Gun(String);

impl Gun {
    pub fn new<S: Into<String>>(s: S) -> Result<Self> {
        let s = s.into();
        ensure!(!s.is_empty(), error::EmptyGunSnafu);
        Ok(Gun(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Gun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Gun {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_empty() {
        assert!(Gun::new("").is_err());
    }

    #[test]
    fn accepts_repo_path() {
        let g = Gun::new("docker.io/library/alpine").unwrap();
        assert_eq!(g.as_str(), "docker.io/library/alpine");
    }
}
