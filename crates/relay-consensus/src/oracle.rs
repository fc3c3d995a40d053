// Active set oracle
//
// The set of bridge nodes currently eligible to vote is tracked outside the
// relay. The relay only reads it: its size is the quorum denominator and, under
// the active-set admission policy, membership gates who may vote.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Identity of a bridge node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        MemberId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        MemberId(id.to_string())
    }
}

/// Read-only view of the active set.
pub trait ActiveSetOracle {
    /// Number of currently active members.
    fn count(&self) -> u64;

    /// Whether `member` is currently active.
    fn is_member(&self, member: &MemberId) -> bool;
}

impl<O: ActiveSetOracle + ?Sized> ActiveSetOracle for Arc<O> {
    fn count(&self) -> u64 {
        (**self).count()
    }

    fn is_member(&self, member: &MemberId) -> bool {
        (**self).is_member(member)
    }
}

impl<O: ActiveSetOracle + ?Sized> ActiveSetOracle for &O {
    fn count(&self) -> u64 {
        (**self).count()
    }

    fn is_member(&self, member: &MemberId) -> bool {
        (**self).is_member(member)
    }
}

/// In-memory active set, used by tests and the replay tool.
///
/// Either an explicit member list, or an anonymous size when only the quorum
/// denominator matters.
#[derive(Debug, Default)]
pub struct StaticActiveSet {
    inner: RwLock<ActiveSetInner>,
}

#[derive(Debug, Default)]
struct ActiveSetInner {
    members: BTreeSet<MemberId>,
    /// Overrides `members.len()` when set
    size_override: Option<u64>,
}

impl StaticActiveSet {
    pub fn with_members<I, M>(members: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<MemberId>,
    {
        let members = members.into_iter().map(Into::into).collect();
        StaticActiveSet {
            inner: RwLock::new(ActiveSetInner { members, size_override: None }),
        }
    }

    /// An active set of `size` anonymous members. Nobody passes `is_member`.
    pub fn with_size(size: u64) -> Self {
        StaticActiveSet {
            inner: RwLock::new(ActiveSetInner { members: BTreeSet::new(), size_override: Some(size) }),
        }
    }

    pub fn add_member(&self, member: impl Into<MemberId>) {
        self.inner.write().members.insert(member.into());
    }

    pub fn remove_member(&self, member: &MemberId) -> bool {
        self.inner.write().members.remove(member)
    }

    pub fn set_size(&self, size: u64) {
        self.inner.write().size_override = Some(size);
    }
}

impl ActiveSetOracle for StaticActiveSet {
    fn count(&self) -> u64 {
        let inner = self.inner.read();
        inner.size_override.unwrap_or(inner.members.len() as u64)
    }

    fn is_member(&self, member: &MemberId) -> bool {
        self.inner.read().members.contains(member)
    }
}
