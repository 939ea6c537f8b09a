use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PackagingError;

/// Name of a Chalice deployment stage (e.g. `prod`, `dev`).
///
/// The name is passed to `chalice package --stage` both as a process argument and
/// inside the container's shell command, so construction validates it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StageName(String);

impl StageName {
    pub fn new(name: impl Into<String>) -> Result<Self, PackagingError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(PackagingError::InvalidStageName { name });
        }
        Ok(StageName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StageName {
    type Err = PackagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageName::new(s)
    }
}

impl TryFrom<String> for StageName {
    type Error = PackagingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        StageName::new(value)
    }
}

impl From<StageName> for String {
    fn from(stage: StageName) -> Self {
        stage.0
    }
}

impl AsRef<str> for StageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_identifier_like_names() {
        for name in ["prod", "dev-eu", "stage_2", "V1"] {
            assert!(StageName::new(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn rejects_empty_and_shell_sensitive_names() {
        for name in ["", "prod; rm -rf /", "a b", "dev\"", "$(id)"] {
            let err = StageName::new(name).unwrap_err();
            assert!(matches!(err, PackagingError::InvalidStageName { .. }));
        }
    }
}
