//! Locate, insert, replace and remove one entry inside a policy document.
//!
//! # Purpose
//! Works on a fetched (normalized) document in memory. The reconciler decides
//! when to call it and what to do with the result; this module never performs
//! I/O.
//!
//! # Key invariants
//! - Records whose key does not match are left untouched and in order.
//! - Upsert replaces in place, keeping the index; unknown remote fields on the
//!   replaced record are carried over.
//! - Remove of an absent entry is a no-op.
//! - The record written for an upsert must parse back into a valid entry,
//!   otherwise the call fails with a schema violation and nothing is changed.
use grantline_model::{
    Entry, EntryKey, MemberType, ModelResult, Normalize, PolicyDocument, PrincipalEntry,
    PrincipalRecord, TargetEntry, TargetRecord,
};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Upsert(Entry),
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Inserted { index: usize },
    Replaced { index: usize },
    Unchanged { index: usize },
    Removed { index: usize },
    Absent,
}

impl Outcome {
    pub fn changed(self) -> bool {
        matches!(
            self,
            Outcome::Inserted { .. } | Outcome::Replaced { .. } | Outcome::Removed { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub outcome: Outcome,
    /// The entry as it now stands in the document; `None` after a remove.
    pub entry: Option<Entry>,
}

trait Record: Clone + PartialEq {
    fn matches(&self, key: &EntryKey) -> bool;
    fn extra(&self) -> &Map<String, Value>;
    fn extra_mut(&mut self) -> &mut Map<String, Value>;
    fn to_entry(&self) -> ModelResult<Entry>;
}

impl Record for PrincipalRecord {
    fn matches(&self, key: &EntryKey) -> bool {
        PrincipalRecord::matches(self, key)
    }

    fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    fn extra_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.extra
    }

    fn to_entry(&self) -> ModelResult<Entry> {
        PrincipalEntry::from_record(self).map(Entry::Principal)
    }
}

impl Record for TargetRecord {
    fn matches(&self, key: &EntryKey) -> bool {
        TargetRecord::matches(self, key)
    }

    fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    fn extra_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.extra
    }

    fn to_entry(&self) -> ModelResult<Entry> {
        TargetEntry::from_record(self).map(Entry::Target)
    }
}

fn locate<R: Record>(records: &[R], key: &EntryKey) -> ModelResult<Option<(usize, Entry)>> {
    records
        .iter()
        .position(|record| record.matches(key))
        .map(|index| records[index].to_entry().map(|entry| (index, entry)))
        .transpose()
}

fn upsert<R: Record>(records: &mut Vec<R>, key: &EntryKey, mut record: R) -> ModelResult<Outcome> {
    // Validate what will actually be written before touching the collection.
    record.to_entry()?;
    match records.iter().position(|existing| existing.matches(key)) {
        Some(index) => {
            *record.extra_mut() = records[index].extra().clone();
            if records[index] == record {
                return Ok(Outcome::Unchanged { index });
            }
            records[index] = record;
            Ok(Outcome::Replaced { index })
        }
        None => {
            records.push(record);
            Ok(Outcome::Inserted {
                index: records.len() - 1,
            })
        }
    }
}

fn remove<R: Record>(records: &mut Vec<R>, key: &EntryKey) -> Outcome {
    let Some(index) = records.iter().position(|record| record.matches(key)) else {
        return Outcome::Absent;
    };
    // Out-of-band duplicates of the same key go too; the entry must be gone afterwards.
    records.retain(|record| !record.matches(key));
    Outcome::Removed { index }
}

/// Read-only lookup of the entry `key` names.
///
/// Fails with a schema violation when the stored record does not satisfy the
/// entry invariants.
pub fn find(document: &PolicyDocument, key: &EntryKey) -> ModelResult<Option<Entry>> {
    let found = match key.member_type {
        MemberType::Database => locate(&document.targets, key)?,
        _ => locate(&document.principals, key)?,
    };
    Ok(found.map(|(_, entry)| entry))
}

/// Apply `operation` to the entry `key` names, in place.
///
/// On error the document is left as it was.
pub fn apply(
    document: &mut PolicyDocument,
    key: &EntryKey,
    operation: Operation,
) -> ModelResult<Applied> {
    match operation {
        Operation::Upsert(entry) => {
            entry.validate()?;
            entry.ensure_matches(key)?;
            let entry = entry.normalized();
            let outcome = match &entry {
                Entry::Principal(principal) => {
                    upsert(&mut document.principals, key, principal.to_record())?
                }
                Entry::Target(target) => upsert(&mut document.targets, key, target.to_record())?,
            };
            Ok(Applied {
                outcome,
                entry: Some(entry),
            })
        }
        Operation::Remove => {
            let outcome = match key.member_type {
                MemberType::Database => remove(&mut document.targets, key),
                _ => remove(&mut document.principals, key),
            };
            Ok(Applied {
                outcome,
                entry: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grantline_model::{AuthProfile, DbProfile, ModelError, PrincipalType, SourceDirectory};
    use proptest::prelude::*;

    fn key(member: &str, member_type: MemberType) -> EntryKey {
        EntryKey::new("p1", member, member_type).expect("key")
    }

    fn role(id: &str, name: &str) -> Entry {
        PrincipalEntry::role(id, name).expect("role").into()
    }

    fn user(id: &str) -> Entry {
        PrincipalEntry::user(id, id.to_uppercase(), "D", "d1")
            .expect("user")
            .into()
    }

    fn document_with(entries: &[Entry]) -> PolicyDocument {
        let mut document = PolicyDocument::new("p");
        document.id = "p1".to_string();
        for entry in entries {
            match entry {
                Entry::Principal(p) => document.principals.push(p.to_record()),
                Entry::Target(t) => document.targets.push(t.to_record()),
            }
        }
        document
    }

    #[test]
    fn upsert_appends_then_replaces_in_place() {
        let mut document = document_with(&[role("r1", "One"), role("r2", "Two")]);

        let applied = apply(
            &mut document,
            &key("u1", MemberType::User),
            Operation::Upsert(user("u1")),
        )
        .expect("insert");
        assert_eq!(applied.outcome, Outcome::Inserted { index: 2 });

        let applied = apply(
            &mut document,
            &key("r1", MemberType::Role),
            Operation::Upsert(role("r1", "Renamed")),
        )
        .expect("replace");
        assert_eq!(applied.outcome, Outcome::Replaced { index: 0 });
        assert_eq!(document.principals[0].name.as_deref(), Some("Renamed"));
        assert_eq!(document.principals[1].principal_id, "r2");
    }

    #[test]
    fn upsert_of_identical_entry_is_unchanged() {
        let mut document = document_with(&[role("r1", "One")]);
        let before = document.clone();
        let applied = apply(
            &mut document,
            &key("r1", MemberType::Role),
            Operation::Upsert(role("r1", "One")),
        )
        .expect("upsert");
        assert_eq!(applied.outcome, Outcome::Unchanged { index: 0 });
        assert_eq!(document, before);
    }

    #[test]
    fn upsert_keeps_unknown_remote_fields() {
        let mut document = document_with(&[role("r1", "One")]);
        document.principals[0]
            .extra
            .insert("granted_by".to_string(), Value::from("ops"));
        apply(
            &mut document,
            &key("r1", MemberType::Role),
            Operation::Upsert(role("r1", "Renamed")),
        )
        .expect("replace");
        assert_eq!(
            document.principals[0].extra.get("granted_by"),
            Some(&Value::from("ops"))
        );
    }

    #[test]
    fn remove_is_idempotent_and_keeps_order() {
        let mut document =
            document_with(&[role("r1", "One"), role("r2", "Two"), role("r3", "Three")]);
        let target = key("r2", MemberType::Role);
        let first = apply(&mut document, &target, Operation::Remove).expect("remove");
        assert_eq!(first.outcome, Outcome::Removed { index: 1 });
        let after_first = document.clone();
        let second = apply(&mut document, &target, Operation::Remove).expect("remove again");
        assert_eq!(second.outcome, Outcome::Absent);
        assert_eq!(document, after_first);
        let ids: Vec<_> = document.principals.iter().map(|p| p.principal_id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r3"]);
    }

    #[test]
    fn same_id_different_type_is_a_different_entry() {
        let mut document = document_with(&[role("x", "Role X")]);
        apply(&mut document, &key("x", MemberType::User), Operation::Remove).expect("remove");
        assert_eq!(document.principals.len(), 1);
    }

    #[test]
    fn schema_violations_leave_document_untouched() {
        let mut document = document_with(&[role("r1", "One")]);
        let before = document.clone();
        let invalid = Entry::Principal(PrincipalEntry {
            principal_id: "r9".to_string(),
            principal_type: PrincipalType::Role,
            display_name: "Bad".to_string(),
            directory: Some(SourceDirectory {
                name: "D".to_string(),
                id: "d1".to_string(),
            }),
        });
        let err = apply(&mut document, &key("r9", MemberType::Role), Operation::Upsert(invalid))
            .expect_err("role with directory");
        assert!(matches!(err, ModelError::SchemaViolation(_)));
        assert_eq!(document, before);
    }

    #[test]
    fn upsert_rejects_entry_under_foreign_key() {
        let mut document = document_with(&[]);
        let err = apply(
            &mut document,
            &key("r2", MemberType::Role),
            Operation::Upsert(role("r1", "One")),
        )
        .expect_err("mismatch");
        assert!(matches!(err, ModelError::SchemaViolation(_)));
    }

    #[test]
    fn targets_live_in_their_own_collection() {
        let target: Entry = TargetEntry::new(
            "db-1",
            AuthProfile::Db(DbProfile {
                roles: vec!["w".to_string(), "r".to_string()],
                databases: vec![],
            }),
        )
        .expect("target")
        .into();
        let mut document = document_with(&[role("db-1", "Same id")]);
        let db_key = key("db-1", MemberType::Database);
        apply(&mut document, &db_key, Operation::Upsert(target)).expect("insert");
        assert_eq!(document.targets.len(), 1);
        assert_eq!(document.principals.len(), 1);
        let found = find(&document, &db_key).expect("find").expect("present");
        let Entry::Target(found) = found else {
            panic!("expected target");
        };
        let AuthProfile::Db(profile) = found.profile else {
            panic!("expected db profile");
        };
        assert_eq!(profile.roles, vec!["r".to_string(), "w".to_string()]);
    }

    #[test]
    fn find_reports_invalid_stored_record() {
        let mut document = document_with(&[]);
        let mut record = PrincipalEntry::role("r1", "One").expect("role").to_record();
        record.source_directory_name = Some("D".to_string());
        record.source_directory_id = Some("d1".to_string());
        document.principals.push(record);
        assert!(find(&document, &key("r1", MemberType::Role)).is_err());
        assert_eq!(find(&document, &key("r2", MemberType::Role)), Ok(None));
    }

    proptest! {
        #[test]
        fn other_entries_are_untouched(
            ids in proptest::collection::btree_set("[a-z]{1,6}", 1..8),
            pick in any::<prop::sample::Index>(),
            remove in any::<bool>(),
        ) {
            let ids: Vec<String> = ids.into_iter().collect();
            let entries: Vec<Entry> = ids.iter().map(|id| role(id, "Name")).collect();
            let mut document = document_with(&entries);
            let before = document.clone();
            let chosen = pick.get(&ids).clone();
            let target = key(&chosen, MemberType::Role);
            let operation = if remove {
                Operation::Remove
            } else {
                Operation::Upsert(role(&chosen, "Changed"))
            };
            apply(&mut document, &target, operation).unwrap();

            let untouched = |records: &[PrincipalRecord]| -> Vec<PrincipalRecord> {
                records.iter().filter(|r| !r.matches(&target)).cloned().collect()
            };
            let untouched_before = untouched(&before.principals);
            let untouched_after = untouched(&document.principals);
            prop_assert_eq!(untouched_before, untouched_after);
        }
    }
}
