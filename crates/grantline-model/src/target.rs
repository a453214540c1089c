//! Database targets attached to a policy and their authentication profiles.
//!
//! # Purpose
//! The remote service stores one optional block per authentication method on
//! every target and relies on `authentication_method` to say which one is
//! live. [`TargetEntry`] replaces that with [`AuthProfile`], a sum type that
//! cannot hold more than one profile.
//!
//! # Key invariants
//! - Converting a record into an entry fails unless exactly one profile block
//!   is populated and it matches `authentication_method`.
//! - Converting an entry into a record populates exactly one block.
use crate::errors::{ModelError, ModelResult};
use crate::key::EntryKey;
use crate::member::{AuthMethod, MemberType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbProfile {
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub databases: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LdapProfile {
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleProfile {
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub system_privileges: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MongoProfile {
    pub auth_database: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlServerProfile {
    #[serde(default)]
    pub server_roles: Vec<String>,
    #[serde(default)]
    pub database_roles: Vec<String>,
    #[serde(default)]
    pub databases: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RdsIamProfile {
    pub db_user: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthProfile {
    Db(DbProfile),
    Ldap(LdapProfile),
    Oracle(OracleProfile),
    Mongo(MongoProfile),
    #[serde(rename = "sqlserver")]
    SqlServer(SqlServerProfile),
    RdsIam(RdsIamProfile),
}

impl AuthProfile {
    pub fn method(&self) -> AuthMethod {
        match self {
            AuthProfile::Db(_) => AuthMethod::DbUser,
            AuthProfile::Ldap(_) => AuthMethod::Ldap,
            AuthProfile::Oracle(_) => AuthMethod::Oracle,
            AuthProfile::Mongo(_) => AuthMethod::Mongo,
            AuthProfile::SqlServer(_) => AuthMethod::SqlServer,
            AuthProfile::RdsIam(_) => AuthMethod::RdsIam,
        }
    }

    fn validate(&self) -> ModelResult<()> {
        match self {
            AuthProfile::Mongo(profile) if profile.auth_database.is_empty() => Err(
                ModelError::schema("mongo profile requires auth_database"),
            ),
            AuthProfile::RdsIam(profile) if profile.db_user.is_empty() => {
                Err(ModelError::schema("rds_iam profile requires db_user"))
            }
            _ => Ok(()),
        }
    }
}

/// Target as it appears inside a remote policy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub database_id: String,
    pub authentication_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_profile: Option<DbProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ldap_profile: Option<LdapProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle_profile: Option<OracleProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mongo_profile: Option<MongoProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlserver_profile: Option<SqlServerProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rds_iam_profile: Option<RdsIamProfile>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TargetRecord {
    pub fn matches(&self, key: &EntryKey) -> bool {
        key.member_type == MemberType::Database && self.database_id == key.member_id
    }

    fn populated_methods(&self) -> Vec<AuthMethod> {
        [
            (AuthMethod::DbUser, self.db_profile.is_some()),
            (AuthMethod::Ldap, self.ldap_profile.is_some()),
            (AuthMethod::Oracle, self.oracle_profile.is_some()),
            (AuthMethod::Mongo, self.mongo_profile.is_some()),
            (AuthMethod::SqlServer, self.sqlserver_profile.is_some()),
            (AuthMethod::RdsIam, self.rds_iam_profile.is_some()),
        ]
        .into_iter()
        .filter_map(|(method, present)| present.then_some(method))
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetEntry {
    pub database_id: String,
    #[serde(flatten)]
    pub profile: AuthProfile,
}

impl TargetEntry {
    pub fn new(database_id: impl Into<String>, profile: AuthProfile) -> ModelResult<Self> {
        let entry = Self {
            database_id: database_id.into(),
            profile,
        };
        entry.validate()?;
        Ok(entry)
    }

    pub fn validate(&self) -> ModelResult<()> {
        if self.database_id.is_empty() {
            return Err(ModelError::schema("database_id must not be empty"));
        }
        self.profile.validate()
    }

    pub fn method(&self) -> AuthMethod {
        self.profile.method()
    }

    pub fn key(&self, policy_id: &str) -> ModelResult<EntryKey> {
        EntryKey::new(policy_id, &self.database_id, MemberType::Database)
    }

    pub fn to_record(&self) -> TargetRecord {
        let mut record = TargetRecord {
            database_id: self.database_id.clone(),
            authentication_method: self.method().as_str().to_string(),
            db_profile: None,
            ldap_profile: None,
            oracle_profile: None,
            mongo_profile: None,
            sqlserver_profile: None,
            rds_iam_profile: None,
            extra: Map::new(),
        };
        match &self.profile {
            AuthProfile::Db(profile) => record.db_profile = Some(profile.clone()),
            AuthProfile::Ldap(profile) => record.ldap_profile = Some(profile.clone()),
            AuthProfile::Oracle(profile) => record.oracle_profile = Some(profile.clone()),
            AuthProfile::Mongo(profile) => record.mongo_profile = Some(profile.clone()),
            AuthProfile::SqlServer(profile) => record.sqlserver_profile = Some(profile.clone()),
            AuthProfile::RdsIam(profile) => record.rds_iam_profile = Some(profile.clone()),
        }
        record
    }

    pub fn from_record(record: &TargetRecord) -> ModelResult<Self> {
        let method = AuthMethod::parse(&record.authentication_method)?;
        let populated = record.populated_methods();
        if populated != [method] {
            let names: Vec<&str> = populated.iter().map(|m| m.profile_field()).collect();
            return Err(ModelError::schema(format!(
                "target {:?} uses {method} and must populate exactly {}; populated: [{}]",
                record.database_id,
                method.profile_field(),
                names.join(", ")
            )));
        }
        // `populated == [method]` guarantees the matching block is present.
        let profile = match method {
            AuthMethod::DbUser => record.db_profile.clone().map(AuthProfile::Db),
            AuthMethod::Ldap => record.ldap_profile.clone().map(AuthProfile::Ldap),
            AuthMethod::Oracle => record.oracle_profile.clone().map(AuthProfile::Oracle),
            AuthMethod::Mongo => record.mongo_profile.clone().map(AuthProfile::Mongo),
            AuthMethod::SqlServer => record.sqlserver_profile.clone().map(AuthProfile::SqlServer),
            AuthMethod::RdsIam => record.rds_iam_profile.clone().map(AuthProfile::RdsIam),
        }
        .ok_or_else(|| ModelError::schema(format!("missing {}", method.profile_field())))?;
        Self::new(record.database_id.clone(), profile)
    }
}
