//! State node tags understood by the migration gate.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Wire form of [`Tag::NoMigrate`].
pub const NO_MIGRATE_TAG: &str = "diachronic.v1.no-migrate";

/// Wire form of [`Tag::CanInterrupt`].
pub const CAN_INTERRUPT_TAG: &str = "diachronic.v1.can-interrupt";

/// Tag attached to a state node.
///
/// The two migration tags are checked by set membership; any other tag
/// string is kept as [`Tag::Custom`] and has no meaning to the gate.
///
/// # Example
///
/// ```rust
/// use diachronic::chart::Tag;
///
/// assert_eq!(Tag::from("diachronic.v1.no-migrate"), Tag::NoMigrate);
/// assert_eq!(Tag::CanInterrupt.as_str(), "diachronic.v1.can-interrupt");
/// assert_eq!(Tag::from("billing"), Tag::Custom("billing".to_string()));
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Tag {
    /// Migration is forbidden while the node is active
    NoMigrate,
    /// The node's invocation may be abandoned by a migration
    CanInterrupt,
    /// Application-defined tag
    Custom(String),
}

impl Tag {
    /// The tag's wire string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::NoMigrate => NO_MIGRATE_TAG,
            Self::CanInterrupt => CAN_INTERRUPT_TAG,
            Self::Custom(name) => name,
        }
    }
}

impl From<&str> for Tag {
    fn from(raw: &str) -> Self {
        match raw {
            NO_MIGRATE_TAG => Self::NoMigrate,
            CAN_INTERRUPT_TAG => Self::CanInterrupt,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.as_str()))
    }
}
