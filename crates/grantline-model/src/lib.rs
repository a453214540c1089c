//! Shared model for grantline policies and the entries embedded in them.
//!
//! # Purpose
//! Defines the policy document as the remote service stores it, the typed
//! principal/target entries that assignment resources own, the composite keys
//! that identify those entries, and the normalization rules used to compare
//! remote and declared state.
//!
//! # How it fits
//! The provider service fetches [`PolicyDocument`]s, locates entries by
//! [`EntryKey`], and writes documents back. Nothing in this crate performs I/O.
//!
//! # Key invariants
//! - A principal of type USER or GROUP carries both source-directory fields; a
//!   ROLE carries neither.
//! - A target carries exactly one authentication profile, matching its method.
//! - Composite keys are `policy_id:member_id:member_type` with no `:` in fields.
//!
//! # Examples
//! ```rust
//! use grantline_model::{Entry, PrincipalEntry};
//!
//! let entry: Entry = PrincipalEntry::user("u1", "Ursula", "corp", "d-42").unwrap().into();
//! assert_eq!(entry.key("p1").unwrap().encode(), "p1:u1:USER");
//! ```
mod entry;
mod errors;
pub mod key;
mod member;
pub mod normalize;
mod policy;
mod principal;
mod target;

pub use entry::Entry;
pub use errors::{KEY_SHAPE, ModelError, ModelResult};
pub use key::{EntryKey, KEY_SEPARATOR};
pub use member::{AuthMethod, MemberType, PrincipalType};
pub use normalize::Normalize;
pub use policy::{AccessWindow, PolicyDocument, TimeWindow, VersionMarker, VersionedPolicy};
pub use principal::{PrincipalEntry, PrincipalRecord, SourceDirectory};
pub use target::{
    AuthProfile, DbProfile, LdapProfile, MongoProfile, OracleProfile, RdsIamProfile,
    SqlServerProfile, TargetEntry, TargetRecord,
};
