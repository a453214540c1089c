//! Composite keys for entries embedded in a policy document.
//!
//! # Purpose
//! Identifies one principal or target inside one policy with a stable,
//! operator-visible string (`policy_id:member_id:member_type`). The string is
//! what assignment resources store as their id and what operators pass on
//! import.
//!
//! # Key invariants
//! - Exactly three non-empty fields joined by `:`.
//! - Field values never contain `:`; encoding fails fast instead of escaping.
//! - `decode(encode(a, b, c)) == (a, b, c)` for every valid input.
//!
//! # Examples
//! ```rust
//! use grantline_model::{EntryKey, MemberType};
//!
//! let key = EntryKey::new("p1", "alice", MemberType::User).unwrap();
//! assert_eq!(key.encode(), "p1:alice:USER");
//! assert_eq!(EntryKey::decode("p1:alice:USER").unwrap(), key);
//! ```
use crate::errors::{ModelError, ModelResult};
use crate::member::MemberType;
use serde::{Deserialize, Serialize};

pub const KEY_SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryKey {
    pub policy_id: String,
    pub member_id: String,
    pub member_type: MemberType,
}

impl EntryKey {
    pub fn new(
        policy_id: impl Into<String>,
        member_id: impl Into<String>,
        member_type: MemberType,
    ) -> ModelResult<Self> {
        let key = Self {
            policy_id: policy_id.into(),
            member_id: member_id.into(),
            member_type,
        };
        key.validate()?;
        Ok(key)
    }

    pub fn validate(&self) -> ModelResult<()> {
        for (field, value) in [
            ("policy_id", self.policy_id.as_str()),
            ("member_id", self.member_id.as_str()),
        ] {
            if value.is_empty() {
                return Err(ModelError::malformed_key(
                    self.raw_parts(),
                    format!("{field} is empty"),
                ));
            }
            if value.contains(KEY_SEPARATOR) {
                return Err(ModelError::malformed_key(
                    self.raw_parts(),
                    format!("{field} {value:?} contains '{KEY_SEPARATOR}'"),
                ));
            }
        }
        Ok(())
    }

    pub fn encode(&self) -> String {
        format!(
            "{}{KEY_SEPARATOR}{}{KEY_SEPARATOR}{}",
            self.policy_id,
            self.member_id,
            self.member_type.as_str()
        )
    }

    pub fn decode(raw: &str) -> ModelResult<Self> {
        let parts: Vec<&str> = raw.split(KEY_SEPARATOR).collect();
        let [policy_id, member_id, member_type] = parts.as_slice() else {
            return Err(ModelError::malformed_key(
                raw,
                format!("expected 3 fields, got {}", parts.len()),
            ));
        };
        if policy_id.is_empty() || member_id.is_empty() || member_type.is_empty() {
            return Err(ModelError::malformed_key(raw, "empty field"));
        }
        let member_type = member_type.parse::<MemberType>().map_err(|_| {
            ModelError::malformed_key(raw, format!("unknown member type {member_type:?}"))
        })?;
        Ok(Self {
            policy_id: (*policy_id).to_string(),
            member_id: (*member_id).to_string(),
            member_type,
        })
    }

    // Used in error messages before the key is known to be valid.
    fn raw_parts(&self) -> String {
        format!(
            "{}{KEY_SEPARATOR}{}{KEY_SEPARATOR}{}",
            self.policy_id, self.member_id, self.member_type
        )
    }
}

impl std::fmt::Display for EntryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

impl std::str::FromStr for EntryKey {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        EntryKey::decode(value)
    }
}

pub fn encode(policy_id: &str, member_id: &str, member_type: MemberType) -> ModelResult<String> {
    EntryKey::new(policy_id, member_id, member_type).map(|key| key.encode())
}

pub fn decode(raw: &str) -> ModelResult<EntryKey> {
    EntryKey::decode(raw)
}
