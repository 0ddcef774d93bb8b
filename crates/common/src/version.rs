use serde::{Deserialize, Serialize};

/// Row version guarding conditional writes to orders, payments, refunds and
/// inventory slots.
///
/// Stored as `BIGINT`. A writer remembers the version it read and the store
/// only accepts the write if the row still carries it, see [`Version::claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Carried by records built in memory and not inserted yet.
    pub const UNSAVED: Version = Version(0);

    /// Assigned by the store on insert.
    pub const FIRST: Version = Version(1);

    /// Wraps a version column read back from the database.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }

    pub fn is_saved(self) -> bool {
        self >= Self::FIRST
    }

    /// Called on the stored version with the one a writer read. Returns the
    /// version the write should store, or `None` when another write landed
    /// in between.
    pub fn claim(self, read: Version) -> Option<Version> {
        (self == read && self.is_saved()).then(|| self.next())
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::UNSAVED
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_start_unsaved() {
        assert_eq!(Version::default(), Version::UNSAVED);
        assert!(!Version::UNSAVED.is_saved());
        assert_eq!(Version::UNSAVED.next(), Version::FIRST);
    }

    #[test]
    fn claim_succeeds_only_against_the_version_read() {
        let stored = Version::new(3);
        assert_eq!(stored.claim(Version::new(3)), Some(Version::new(4)));
        assert_eq!(stored.claim(Version::new(2)), None);
        assert_eq!(stored.claim(Version::new(4)), None);
    }

    #[test]
    fn unsaved_records_cannot_be_claimed() {
        assert_eq!(Version::UNSAVED.claim(Version::UNSAVED), None);
    }

    #[test]
    fn serializes_as_a_bare_number() {
        assert_eq!(serde_json::to_string(&Version::new(7)).unwrap(), "7");
        assert_eq!(Version::new(7).to_string(), "7");
    }
}
