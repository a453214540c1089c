use crate::errors::{ModelError, ModelResult};
use crate::key::EntryKey;
use crate::member::MemberType;
use crate::principal::PrincipalEntry;
use crate::target::TargetEntry;
use serde::{Deserialize, Serialize};

/// One element of a policy's embedded collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entry {
    Principal(PrincipalEntry),
    Target(TargetEntry),
}

impl Entry {
    pub fn key(&self, policy_id: &str) -> ModelResult<EntryKey> {
        match self {
            Entry::Principal(entry) => entry.key(policy_id),
            Entry::Target(entry) => entry.key(policy_id),
        }
    }

    pub fn validate(&self) -> ModelResult<()> {
        match self {
            Entry::Principal(entry) => entry.validate(),
            Entry::Target(entry) => entry.validate(),
        }
    }

    /// Fails unless this entry is the one `key` names.
    pub fn ensure_matches(&self, key: &EntryKey) -> ModelResult<()> {
        let own = self.key(&key.policy_id)?;
        if &own != key {
            return Err(ModelError::schema(format!(
                "entry {own} does not belong under key {key}"
            )));
        }
        Ok(())
    }

    pub fn member_type(&self) -> MemberType {
        match self {
            Entry::Principal(entry) => entry.principal_type.into(),
            Entry::Target(_) => MemberType::Database,
        }
    }
}

impl From<PrincipalEntry> for Entry {
    fn from(value: PrincipalEntry) -> Self {
        Entry::Principal(value)
    }
}

impl From<TargetEntry> for Entry {
    fn from(value: TargetEntry) -> Self {
        Entry::Target(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{AuthProfile, LdapProfile};

    #[test]
    fn key_follows_entry_kind() {
        let principal: Entry = PrincipalEntry::role("r1", "Readers").expect("role").into();
        assert_eq!(principal.key("p1").expect("key").encode(), "p1:r1:ROLE");

        let target: Entry = TargetEntry::new("db-1", AuthProfile::Ldap(LdapProfile::default()))
            .expect("target")
            .into();
        assert_eq!(target.key("p1").expect("key").encode(), "p1:db-1:DATABASE");
    }

    #[test]
    fn ensure_matches_rejects_foreign_key() {
        let entry: Entry = PrincipalEntry::role("r1", "Readers").expect("role").into();
        let other = EntryKey::new("p1", "r2", MemberType::Role).expect("key");
        assert!(entry.ensure_matches(&other).is_err());
        let own = EntryKey::new("p1", "r1", MemberType::Role).expect("key");
        assert!(entry.ensure_matches(&own).is_ok());
    }
}
