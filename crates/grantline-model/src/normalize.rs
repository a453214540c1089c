//! Canonical forms for comparing remote and declared state.
//!
//! # Purpose
//! The remote service re-capitalizes enum-like strings and returns sets in
//! whatever order it likes. Everything that compares or writes policy content
//! goes through [`Normalize`] first so semantically equal values compare equal
//! and nothing is reported as drift.
//!
//! # Key invariants
//! - Pure: no I/O, no clock, same output for the same input.
//! - Idempotent: normalizing a normalized value is a no-op.
//! - Used on the read path and the write path alike.
use crate::entry::Entry;
use crate::member::{AuthMethod, PrincipalType};
use crate::policy::{AccessWindow, PolicyDocument};
use crate::principal::{PrincipalEntry, PrincipalRecord};
use crate::target::{AuthProfile, TargetEntry, TargetRecord};

pub trait Normalize {
    fn normalize(&mut self);

    fn normalized(&self) -> Self
    where
        Self: Clone,
    {
        let mut value = self.clone();
        value.normalize();
        value
    }
}

/// Sort ascending and drop duplicates.
pub fn canonical_set<T: Ord>(values: &mut Vec<T>) {
    values.sort();
    values.dedup();
}

pub fn same_enum_value(left: &str, right: &str) -> bool {
    left.eq_ignore_ascii_case(right)
}

/// Value to show in client state for an enum-like field.
///
/// Keeps the declared spelling when the remote value differs only by case, so
/// a re-capitalizing remote never shows up as a diff.
pub fn declared_casing(remote: Option<&str>, declared: Option<&str>) -> Option<String> {
    match (remote, declared) {
        (Some(remote), Some(declared)) if same_enum_value(remote, declared) => {
            Some(declared.to_string())
        }
        (remote, _) => remote.map(str::to_string),
    }
}

impl Normalize for AccessWindow {
    fn normalize(&mut self) {
        canonical_set(&mut self.days_of_week);
    }
}

impl Normalize for AuthProfile {
    fn normalize(&mut self) {
        match self {
            AuthProfile::Db(profile) => {
                canonical_set(&mut profile.roles);
                canonical_set(&mut profile.databases);
            }
            AuthProfile::Ldap(profile) => canonical_set(&mut profile.groups),
            AuthProfile::Oracle(profile) => {
                canonical_set(&mut profile.roles);
                canonical_set(&mut profile.system_privileges);
            }
            AuthProfile::Mongo(profile) => canonical_set(&mut profile.roles),
            AuthProfile::SqlServer(profile) => {
                canonical_set(&mut profile.server_roles);
                canonical_set(&mut profile.database_roles);
                canonical_set(&mut profile.databases);
            }
            AuthProfile::RdsIam(_) => {}
        }
    }
}

impl Normalize for TargetEntry {
    fn normalize(&mut self) {
        self.profile.normalize();
    }
}

impl Normalize for PrincipalEntry {
    fn normalize(&mut self) {}
}

impl Normalize for Entry {
    fn normalize(&mut self) {
        match self {
            Entry::Principal(entry) => entry.normalize(),
            Entry::Target(entry) => entry.normalize(),
        }
    }
}

impl Normalize for PrincipalRecord {
    fn normalize(&mut self) {
        // Unknown types are left alone; validation reports them when the entry is used.
        if let Ok(principal_type) = PrincipalType::parse(&self.principal_type) {
            self.principal_type = principal_type.as_str().to_string();
        }
    }
}

impl Normalize for TargetRecord {
    fn normalize(&mut self) {
        if let Ok(method) = AuthMethod::parse(&self.authentication_method) {
            self.authentication_method = method.as_str().to_string();
        }
        if let Some(profile) = self.db_profile.as_mut() {
            canonical_set(&mut profile.roles);
            canonical_set(&mut profile.databases);
        }
        if let Some(profile) = self.ldap_profile.as_mut() {
            canonical_set(&mut profile.groups);
        }
        if let Some(profile) = self.oracle_profile.as_mut() {
            canonical_set(&mut profile.roles);
            canonical_set(&mut profile.system_privileges);
        }
        if let Some(profile) = self.mongo_profile.as_mut() {
            canonical_set(&mut profile.roles);
        }
        if let Some(profile) = self.sqlserver_profile.as_mut() {
            canonical_set(&mut profile.server_roles);
            canonical_set(&mut profile.database_roles);
            canonical_set(&mut profile.databases);
        }
    }
}

impl Normalize for PolicyDocument {
    /// Entry order is left as fetched; only values inside entries are canonicalized.
    fn normalize(&mut self) {
        canonical_set(&mut self.tags);
        if let Some(window) = self.access_window.as_mut() {
            window.normalize();
        }
        self.principals.iter_mut().for_each(Normalize::normalize);
        self.targets.iter_mut().for_each(Normalize::normalize);
    }
}
