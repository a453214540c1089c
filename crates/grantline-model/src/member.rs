use crate::errors::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};

/// Kind of member a composite key points at inside a policy.
///
/// Principals use their principal type; database targets use `Database`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberType {
    User,
    Group,
    Role,
    Database,
}

impl MemberType {
    pub const ALL: [MemberType; 4] = [
        MemberType::User,
        MemberType::Group,
        MemberType::Role,
        MemberType::Database,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MemberType::User => "USER",
            MemberType::Group => "GROUP",
            MemberType::Role => "ROLE",
            MemberType::Database => "DATABASE",
        }
    }

    pub fn principal_type(self) -> Option<PrincipalType> {
        match self {
            MemberType::User => Some(PrincipalType::User),
            MemberType::Group => Some(PrincipalType::Group),
            MemberType::Role => Some(PrincipalType::Role),
            MemberType::Database => None,
        }
    }
}

impl std::fmt::Display for MemberType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemberType {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        MemberType::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value))
            .ok_or(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrincipalType {
    User,
    Group,
    Role,
}

impl PrincipalType {
    pub fn as_str(self) -> &'static str {
        MemberType::from(self).as_str()
    }

    /// Users and groups come from a source directory; roles are local to the service.
    pub fn requires_directory(self) -> bool {
        matches!(self, PrincipalType::User | PrincipalType::Group)
    }

    pub fn parse(value: &str) -> ModelResult<Self> {
        value
            .parse::<MemberType>()
            .ok()
            .and_then(MemberType::principal_type)
            .ok_or_else(|| {
                ModelError::schema(format!(
                    "unknown principal type {value:?}; expected one of USER, GROUP, ROLE"
                ))
            })
    }
}

impl From<PrincipalType> for MemberType {
    fn from(value: PrincipalType) -> Self {
        match value {
            PrincipalType::User => MemberType::User,
            PrincipalType::Group => MemberType::Group,
            PrincipalType::Role => MemberType::Role,
        }
    }
}

impl std::fmt::Display for PrincipalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a principal authenticates against an attached database.
///
/// Each method pairs with exactly one profile block on a target entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthMethod {
    DbUser,
    Ldap,
    Oracle,
    Mongo,
    SqlServer,
    RdsIam,
}

impl AuthMethod {
    pub const ALL: [AuthMethod; 6] = [
        AuthMethod::DbUser,
        AuthMethod::Ldap,
        AuthMethod::Oracle,
        AuthMethod::Mongo,
        AuthMethod::SqlServer,
        AuthMethod::RdsIam,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AuthMethod::DbUser => "DB_USER",
            AuthMethod::Ldap => "LDAP",
            AuthMethod::Oracle => "ORACLE",
            AuthMethod::Mongo => "MONGO",
            AuthMethod::SqlServer => "SQL_SERVER",
            AuthMethod::RdsIam => "RDS_IAM",
        }
    }

    /// Name of the profile block the remote document uses for this method.
    pub fn profile_field(self) -> &'static str {
        match self {
            AuthMethod::DbUser => "db_profile",
            AuthMethod::Ldap => "ldap_profile",
            AuthMethod::Oracle => "oracle_profile",
            AuthMethod::Mongo => "mongo_profile",
            AuthMethod::SqlServer => "sqlserver_profile",
            AuthMethod::RdsIam => "rds_iam_profile",
        }
    }

    pub fn parse(value: &str) -> ModelResult<Self> {
        AuthMethod::ALL
            .into_iter()
            .find(|method| method.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| {
                ModelError::schema(format!("unknown authentication method {value:?}"))
            })
    }
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_type_string_roundtrip() {
        for kind in MemberType::ALL {
            assert_eq!(kind.as_str().parse::<MemberType>(), Ok(kind));
            assert_eq!(kind.to_string(), kind.as_str());
        }
    }

    #[test]
    fn member_type_parse_ignores_case() {
        assert_eq!("user".parse::<MemberType>(), Ok(MemberType::User));
        assert_eq!("Database".parse::<MemberType>(), Ok(MemberType::Database));
        assert!("SERVICE".parse::<MemberType>().is_err());
    }

    #[test]
    fn principal_type_rejects_database() {
        assert!(PrincipalType::parse("DATABASE").is_err());
        assert_eq!(PrincipalType::parse("group"), Ok(PrincipalType::Group));
    }

    #[test]
    fn directory_requirement_follows_type() {
        assert!(PrincipalType::User.requires_directory());
        assert!(PrincipalType::Group.requires_directory());
        assert!(!PrincipalType::Role.requires_directory());
    }

    #[test]
    fn auth_method_parse_ignores_case() {
        for method in AuthMethod::ALL {
            let lower = method.as_str().to_ascii_lowercase();
            assert_eq!(AuthMethod::parse(&lower), Ok(method));
        }
        assert!(AuthMethod::parse("KERBEROS").is_err());
    }
}
