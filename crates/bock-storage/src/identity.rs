//! User and group identity resolution.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use bock_common::{BockError, BockResult};

/// A user or group named either by number or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// A numeric id, taken as valid without lookup.
    Numeric(u32),
    /// A name to be resolved through an [`IdentityLookup`].
    Named(String),
}

impl Identity {
    /// Classify a token: base-10 unsigned 32-bit integers are numeric,
    /// anything else is a name.
    #[must_use]
    pub fn parse(token: &str) -> Self {
        token
            .parse::<u32>()
            .map_or_else(|_| Self::Named(token.to_string()), Self::Numeric)
    }

    /// Resolve as a user.
    ///
    /// # Errors
    ///
    /// Returns [`BockError::IdentityLookup`] if the name is unknown.
    pub fn resolve_user(&self, lookup: &dyn IdentityLookup) -> BockResult<u32> {
        match self {
            Self::Numeric(id) => Ok(*id),
            Self::Named(name) => lookup.lookup_user(name),
        }
    }

    /// Resolve as a group.
    ///
    /// # Errors
    ///
    /// Returns [`BockError::IdentityLookup`] if the name is unknown.
    pub fn resolve_group(&self, lookup: &dyn IdentityLookup) -> BockResult<u32> {
        match self {
            Self::Numeric(id) => Ok(*id),
            Self::Named(name) => lookup.lookup_group(name),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(id) => write!(f, "{id}"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

/// Name to id resolution for users and groups.
pub trait IdentityLookup {
    /// Resolve a user name to its uid.
    ///
    /// # Errors
    ///
    /// Returns [`BockError::IdentityLookup`] if the user is unknown.
    fn lookup_user(&self, name: &str) -> BockResult<u32>;

    /// Resolve a group name to its gid.
    ///
    /// # Errors
    ///
    /// Returns [`BockError::IdentityLookup`] if the group is unknown.
    fn lookup_group(&self, name: &str) -> BockResult<u32>;
}

/// Lookup backed by the system account databases.
#[derive(Debug, Clone)]
pub struct SystemIdentities {
    passwd: PathBuf,
    group: PathBuf,
}

impl Default for SystemIdentities {
    fn default() -> Self {
        Self::with_files("/etc/passwd", "/etc/group")
    }
}

impl SystemIdentities {
    /// Use the host's `/etc/passwd` and `/etc/group`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use alternative account files in passwd/group format.
    #[must_use]
    pub fn with_files(passwd: impl Into<PathBuf>, group: impl Into<PathBuf>) -> Self {
        Self {
            passwd: passwd.into(),
            group: group.into(),
        }
    }

    /// Find `name` in the first column and return the third (the id).
    fn find(path: &Path, kind: &'static str, name: &str) -> BockResult<u32> {
        let lookup_err = |reason: String| BockError::IdentityLookup {
            kind,
            token: name.to_string(),
            reason,
        };

        let content = fs::read_to_string(path)
            .map_err(|e| lookup_err(format!("cannot read {}: {e}", path.display())))?;

        for line in content.lines() {
            if line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.split(':').collect();
            if parts.len() >= 3 && parts[0] == name {
                return parts[2]
                    .parse()
                    .map_err(|_| lookup_err(format!("malformed entry in {}", path.display())));
            }
        }

        Err(lookup_err(format!("no matching entries in {}", path.display())))
    }
}

impl IdentityLookup for SystemIdentities {
    fn lookup_user(&self, name: &str) -> BockResult<u32> {
        Self::find(&self.passwd, "uid", name)
    }

    fn lookup_group(&self, name: &str) -> BockResult<u32> {
        Self::find(&self.group, "gid", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, SystemIdentities) {
        let temp = tempfile::tempdir().unwrap();
        let passwd = temp.path().join("passwd");
        let group = temp.path().join("group");
        fs::write(
            &passwd,
            "root:x:0:0:root:/root:/bin/sh\n# comment\ndockremap:x:165536:165536::/:/bin/false\n",
        )
        .unwrap();
        fs::write(&group, "root:x:0:\ndockremap:x:165537:\nbroken:x:abc:\n").unwrap();
        let ids = SystemIdentities::with_files(passwd, group);
        (temp, ids)
    }

    #[test]
    fn parse_classifies_tokens() {
        assert_eq!(Identity::parse("1000"), Identity::Numeric(1000));
        assert_eq!(Identity::parse("4294967295"), Identity::Numeric(u32::MAX));
        assert_eq!(
            Identity::parse("4294967296"),
            Identity::Named("4294967296".to_string())
        );
        assert_eq!(Identity::parse("-5"), Identity::Named("-5".to_string()));
        assert_eq!(
            Identity::parse("dockremap"),
            Identity::Named("dockremap".to_string())
        );
    }

    #[test]
    fn resolves_names() {
        let (_temp, ids) = fixture();
        assert_eq!(ids.lookup_user("dockremap").unwrap(), 165_536);
        assert_eq!(ids.lookup_group("dockremap").unwrap(), 165_537);
        assert_eq!(Identity::parse("root").resolve_user(&ids).unwrap(), 0);
    }

    #[test]
    fn numeric_identities_skip_lookup() {
        let ids = SystemIdentities::with_files("/nonexistent/passwd", "/nonexistent/group");
        assert_eq!(Identity::Numeric(7).resolve_group(&ids).unwrap(), 7);
    }

    #[test]
    fn unknown_name_names_the_token() {
        let (_temp, ids) = fixture();
        let err = ids.lookup_user("nobody-here").unwrap_err();
        match err {
            BockError::IdentityLookup { kind, token, .. } => {
                assert_eq!(kind, "uid");
                assert_eq!(token, "nobody-here");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_entry_is_a_lookup_error() {
        let (_temp, ids) = fixture();
        assert!(matches!(
            ids.lookup_group("broken"),
            Err(BockError::IdentityLookup { .. })
        ));
    }
}
