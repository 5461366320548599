/// Subjects and the resource kinds archived for them
///
/// Resource kinds are handled as a tagged set internally. The integer bitmask
/// only exists at the storage boundary (`ResourceFlags::bits` / `from_bits`).
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Opaque numeric account identifier
pub type SubjectId = u64;

/// A resource that can be archived for a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Posts the subject liked (bounded-ID pagination)
    Favorites,

    /// Accounts following the subject (cursor-pair pagination)
    Followers,

    /// Accounts the subject follows (cursor-pair pagination)
    Friends,

    /// Posts authored by the subject (bounded-ID pagination)
    Timeline,

    /// The subject's own profile (single object, no pagination)
    Profile,
}

impl ResourceKind {
    /// Returns all resource kinds in bit order
    pub fn all() -> [Self; 5] {
        [
            Self::Favorites,
            Self::Followers,
            Self::Friends,
            Self::Timeline,
            Self::Profile,
        ]
    }

    /// Bit used for this kind in the stored flag mask
    pub fn bit(&self) -> u32 {
        match self {
            Self::Favorites => 1 << 0,
            Self::Followers => 1 << 1,
            Self::Friends => 1 << 2,
            Self::Timeline => 1 << 3,
            Self::Profile => 1 << 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Favorites => "favorites",
            Self::Followers => "followers",
            Self::Friends => "friends",
            Self::Timeline => "timeline",
            Self::Profile => "profile",
        }
    }

    /// Returns true for resources paginated by monotonically increasing IDs
    pub fn is_bounded_id(&self) -> bool {
        matches!(self, Self::Favorites | Self::Timeline)
    }

    /// Returns true for resources paginated by an opaque cursor pair
    pub fn is_cursor_pair(&self) -> bool {
        matches!(self, Self::Followers | Self::Friends)
    }

    /// Returns true if the fetched items are posts (and so can embed references)
    pub fn yields_posts(&self) -> bool {
        self.is_bounded_id()
    }

    /// Returns true if id-only adjacency records are kept for this resource
    pub fn tracks_adjacency(&self) -> bool {
        matches!(self, Self::Favorites | Self::Followers | Self::Friends)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "favorites" | "likes" => Ok(Self::Favorites),
            "followers" => Ok(Self::Followers),
            "friends" | "following" => Ok(Self::Friends),
            "timeline" | "statuses" => Ok(Self::Timeline),
            "profile" => Ok(Self::Profile),
            other => Err(format!("unknown resource kind '{}'", other)),
        }
    }
}

/// Set of resource kinds enabled for a subject
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceFlags {
    kinds: BTreeSet<ResourceKind>,
}

impl ResourceFlags {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a flag set from a stored bitmask, ignoring unknown bits
    pub fn from_bits(bits: u32) -> Self {
        let kinds = ResourceKind::all()
            .into_iter()
            .filter(|kind| bits & kind.bit() != 0)
            .collect();
        Self { kinds }
    }

    /// Returns the compact bitmask used by storage
    pub fn bits(&self) -> u32 {
        self.kinds.iter().fold(0, |acc, kind| acc | kind.bit())
    }

    pub fn contains(&self, kind: ResourceKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn insert(&mut self, kind: ResourceKind) -> bool {
        self.kinds.insert(kind)
    }

    pub fn remove(&mut self, kind: ResourceKind) -> bool {
        self.kinds.remove(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.kinds.iter().copied()
    }
}

impl FromIterator<ResourceKind> for ResourceFlags {
    fn from_iter<I: IntoIterator<Item = ResourceKind>>(iter: I) -> Self {
        Self {
            kinds: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for ResourceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kinds.is_empty() {
            return f.write_str("-");
        }
        let names: Vec<&str> = self.kinds.iter().map(|k| k.as_str()).collect();
        f.write_str(&names.join(","))
    }
}

/// An account being archived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub id: SubjectId,
    pub flags: ResourceFlags,
    pub updated_at: Option<String>,
}

impl Subject {
    pub fn new(id: SubjectId, flags: ResourceFlags) -> Self {
        Self {
            id,
            flags,
            updated_at: None,
        }
    }

    pub fn is_enabled(&self, kind: ResourceKind) -> bool {
        self.flags.contains(kind)
    }
}
