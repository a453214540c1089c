//! Principal entries: users, groups and roles attached to a policy.
use crate::errors::{ModelError, ModelResult};
use crate::key::EntryKey;
use crate::member::{MemberType, PrincipalType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Principal as it appears inside a remote policy document.
///
/// Kept loosely typed so entries written out-of-band (or re-cased by the
/// remote service) still round-trip untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrincipalRecord {
    pub principal_id: String,
    pub principal_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_directory_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_directory_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PrincipalRecord {
    /// Whether this record is the one `key` points at.
    ///
    /// Principal types compare case-insensitively; ids compare exactly.
    pub fn matches(&self, key: &EntryKey) -> bool {
        key.member_type != MemberType::Database
            && self.principal_id == key.member_id
            && self
                .principal_type
                .eq_ignore_ascii_case(key.member_type.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDirectory {
    pub name: String,
    pub id: String,
}

/// Validated principal entry owned by one assignment resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalEntry {
    pub principal_id: String,
    pub principal_type: PrincipalType,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<SourceDirectory>,
}

impl PrincipalEntry {
    pub fn new(
        principal_id: impl Into<String>,
        principal_type: PrincipalType,
        display_name: impl Into<String>,
        directory: Option<SourceDirectory>,
    ) -> ModelResult<Self> {
        let entry = Self {
            principal_id: principal_id.into(),
            principal_type,
            display_name: display_name.into(),
            directory,
        };
        entry.validate()?;
        Ok(entry)
    }

    pub fn user(
        principal_id: impl Into<String>,
        display_name: impl Into<String>,
        directory_name: impl Into<String>,
        directory_id: impl Into<String>,
    ) -> ModelResult<Self> {
        Self::new(
            principal_id,
            PrincipalType::User,
            display_name,
            Some(SourceDirectory {
                name: directory_name.into(),
                id: directory_id.into(),
            }),
        )
    }

    pub fn role(
        principal_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> ModelResult<Self> {
        Self::new(principal_id, PrincipalType::Role, display_name, None)
    }

    /// Directory fields are present iff the type is USER or GROUP.
    pub fn validate(&self) -> ModelResult<()> {
        if self.principal_id.is_empty() {
            return Err(ModelError::schema("principal_id must not be empty"));
        }
        match (&self.directory, self.principal_type.requires_directory()) {
            (None, true) => Err(ModelError::schema(format!(
                "{} principal {:?} requires source_directory_name and source_directory_id",
                self.principal_type, self.principal_id
            ))),
            (Some(_), false) => Err(ModelError::schema(format!(
                "{} principal {:?} must not set source directory fields",
                self.principal_type, self.principal_id
            ))),
            (Some(directory), true) if directory.name.is_empty() || directory.id.is_empty() => {
                Err(ModelError::schema(format!(
                    "{} principal {:?} has an empty source directory field",
                    self.principal_type, self.principal_id
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn key(&self, policy_id: &str) -> ModelResult<EntryKey> {
        EntryKey::new(policy_id, &self.principal_id, self.principal_type.into())
    }

    pub fn to_record(&self) -> PrincipalRecord {
        PrincipalRecord {
            principal_id: self.principal_id.clone(),
            principal_type: self.principal_type.as_str().to_string(),
            name: Some(self.display_name.clone()),
            source_directory_name: self.directory.as_ref().map(|d| d.name.clone()),
            source_directory_id: self.directory.as_ref().map(|d| d.id.clone()),
            extra: Map::new(),
        }
    }

    /// Parse and validate a remote record.
    ///
    /// A record carrying only one of the two directory fields is a violation,
    /// not a partially-populated directory.
    pub fn from_record(record: &PrincipalRecord) -> ModelResult<Self> {
        let principal_type = PrincipalType::parse(&record.principal_type)?;
        let directory = match (&record.source_directory_name, &record.source_directory_id) {
            (Some(name), Some(id)) => Some(SourceDirectory {
                name: name.clone(),
                id: id.clone(),
            }),
            (None, None) => None,
            _ => {
                return Err(ModelError::schema(format!(
                    "principal {:?} sets only one of source_directory_name/source_directory_id",
                    record.principal_id
                )));
            }
        };
        Self::new(
            record.principal_id.clone(),
            principal_type,
            record.name.clone().unwrap_or_default(),
            directory,
        )
    }
}
