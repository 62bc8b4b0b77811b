//! Operator secret handling

use serde::{Deserialize, Deserializer};
use std::fmt;
use zeroize::Zeroize;

/// Reset PIN as entered by the operator. Zeroed on drop and never printed.
#[derive(Clone)]
pub struct ResetCredential {
    data: String,
}

impl ResetCredential {
    pub fn new(s: &str) -> Self {
        Self { data: s.to_string() }
    }

    pub fn from_string(s: String) -> Self {
        Self { data: s }
    }

    pub fn as_str(&self) -> &str {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Drop for ResetCredential {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

impl fmt::Debug for ResetCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResetCredential(<redacted>)")
    }
}

impl<'de> Deserialize<'de> for ResetCredential {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from_string)
    }
}
