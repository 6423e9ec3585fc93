use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Address-like account identifier. Globally unique, never parsed.
pub type AccountKey = String;

/// Publication identifier.
pub type PostKey = String;

/// A social account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Account {
    /// Immutable identity key.
    pub key: AccountKey,

    #[serde(default)]
    pub handle: Option<String>,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub bio: Option<String>,

    /// Social counters. Refreshed by every collection run (last write wins).
    #[serde(default)]
    pub follower_count: Option<u64>,

    #[serde(default)]
    pub following_count: Option<u64>,

    #[serde(default)]
    pub post_count: Option<u64>,

    /// When the account was created upstream. Immutable.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    /// When this observation was collected.
    #[serde(default)]
    pub collected_at: Option<DateTime<Utc>>,

    /// Placeholder synthesized for a dangling reference; never observed directly.
    #[serde(default)]
    pub synthetic: bool,
}

impl Account {
    pub fn new(key: impl Into<AccountKey>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    /// Minimal placeholder carrying only the key.
    pub fn stub(key: impl Into<AccountKey>) -> Self {
        Self {
            key: key.into(),
            synthetic: true,
            ..Default::default()
        }
    }
}

/// What a post is relative to other posts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    #[default]
    Original,
    Repost,
    Comment,
    Quote,
    /// Only seen as the far end of a reference; the kind was never observed.
    Unknown,
}

impl fmt::Display for PostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PostKind::Original => "original",
            PostKind::Repost => "repost",
            PostKind::Comment => "comment",
            PostKind::Quote => "quote",
            PostKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl FromStr for PostKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "original" | "post" => Ok(PostKind::Original),
            "repost" | "mirror" => Ok(PostKind::Repost),
            "comment" => Ok(PostKind::Comment),
            "quote" => Ok(PostKind::Quote),
            "unknown" => Ok(PostKind::Unknown),
            other => Err(format!("unknown post kind '{}'", other)),
        }
    }
}

/// Engagement totals as reported by the upstream at fetch time.
/// Treated as a lower bound during reconciliation, never as ground truth.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EngagementTotals {
    #[serde(default)]
    pub comments: u64,
    #[serde(default)]
    pub reposts: u64,
    #[serde(default)]
    pub quotes: u64,
    #[serde(default)]
    pub tips: u64,
}

impl EngagementTotals {
    pub fn get(&self, kind: EngagementKind) -> u64 {
        match kind {
            EngagementKind::Comment => self.comments,
            EngagementKind::Repost => self.reposts,
            EngagementKind::Quote => self.quotes,
            EngagementKind::Tip => self.tips,
        }
    }

    pub fn set(&mut self, kind: EngagementKind, value: u64) {
        match kind {
            EngagementKind::Comment => self.comments = value,
            EngagementKind::Repost => self.reposts = value,
            EngagementKind::Quote => self.quotes = value,
            EngagementKind::Tip => self.tips = value,
        }
    }
}

/// A publication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Post {
    /// Immutable identity key.
    pub key: PostKey,

    /// Author account. Always present on observed posts; `None` only on stubs.
    #[serde(default)]
    pub author: Option<AccountKey>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    /// Opaque content URI. Never fetched.
    #[serde(default)]
    pub content_uri: Option<String>,

    #[serde(default)]
    pub kind: PostKind,

    /// The post this one comments on, reposts or quotes.
    #[serde(default)]
    pub parent: Option<PostKey>,

    #[serde(default)]
    pub totals: Option<EngagementTotals>,

    #[serde(default)]
    pub collected_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub synthetic: bool,
}

impl Post {
    pub fn new(key: impl Into<PostKey>, author: impl Into<AccountKey>) -> Self {
        Self {
            key: key.into(),
            author: Some(author.into()),
            ..Default::default()
        }
    }

    pub fn stub(key: impl Into<PostKey>) -> Self {
        Self {
            key: key.into(),
            kind: PostKind::Unknown,
            synthetic: true,
            ..Default::default()
        }
    }
}

/// Directed follow edge. Identity is the ordered pair itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Follow {
    pub follower: AccountKey,
    pub following: AccountKey,
    #[serde(default)]
    pub followed_on: Option<DateTime<Utc>>,
}

impl Follow {
    pub fn new(follower: impl Into<AccountKey>, following: impl Into<AccountKey>) -> Self {
        Self {
            follower: follower.into(),
            following: following.into(),
            followed_on: None,
        }
    }

    pub fn key(&self) -> (AccountKey, AccountKey) {
        (self.follower.clone(), self.following.clone())
    }
}

/// The ways one post can reference another.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum EngagementKind {
    Comment,
    Repost,
    Quote,
    Tip,
}

impl EngagementKind {
    pub const ALL: [EngagementKind; 4] = [
        EngagementKind::Comment,
        EngagementKind::Repost,
        EngagementKind::Quote,
        EngagementKind::Tip,
    ];

    /// Whether the referencing post is itself content others can reference.
    pub fn carries_content(self) -> bool {
        !matches!(self, EngagementKind::Tip)
    }

    /// Engagement implied by a post of the given kind pointing at its parent.
    pub fn from_post_kind(kind: PostKind) -> Option<Self> {
        match kind {
            PostKind::Comment => Some(EngagementKind::Comment),
            PostKind::Repost => Some(EngagementKind::Repost),
            PostKind::Quote => Some(EngagementKind::Quote),
            PostKind::Original | PostKind::Unknown => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EngagementKind::Comment => "comment",
            EngagementKind::Repost => "repost",
            EngagementKind::Quote => "quote",
            EngagementKind::Tip => "tip",
        }
    }
}

impl fmt::Display for EngagementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngagementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "comment" | "comment_on" => Ok(EngagementKind::Comment),
            "repost" | "repost_of" | "mirror" => Ok(EngagementKind::Repost),
            "quote" | "quote_of" => Ok(EngagementKind::Quote),
            "tip" => Ok(EngagementKind::Tip),
            other => Err(format!("unknown engagement kind '{}'", other)),
        }
    }
}

/// An account engaging with a post through a referencing post.
///
/// Keyed by `(referencing, kind)`: one referencing post yields exactly one
/// engagement against its target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Engagement {
    pub actor: AccountKey,
    pub target: PostKey,
    pub referencing: PostKey,
    pub kind: EngagementKind,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Engagement {
    pub fn key(&self) -> (PostKey, EngagementKind) {
        (self.referencing.clone(), self.kind)
    }
}

/// The four entity collections a snapshot carries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Accounts,
    Posts,
    Follows,
    Engagements,
}

impl EntityType {
    pub const ALL: [EntityType; 4] = [
        EntityType::Accounts,
        EntityType::Posts,
        EntityType::Follows,
        EntityType::Engagements,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Accounts => "accounts",
            EntityType::Posts => "posts",
            EntityType::Follows => "follows",
            EntityType::Engagements => "engagements",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| format!("unknown entity type '{}'", s))
    }
}

/// Closed set of validated records. Nothing loosely typed travels past ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "entity", rename_all = "lowercase")]
pub enum Record {
    Account(Account),
    Post(Post),
    Follow(Follow),
    Engagement(Engagement),
}

impl Record {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Record::Account(_) => EntityType::Accounts,
            Record::Post(_) => EntityType::Posts,
            Record::Follow(_) => EntityType::Follows,
            Record::Engagement(_) => EntityType::Engagements,
        }
    }

    /// Stable string form of the record's identity key. Sinks upsert on it.
    pub fn identity_key(&self) -> String {
        match self {
            Record::Account(a) => a.key.clone(),
            Record::Post(p) => p.key.clone(),
            Record::Follow(f) => format!("{}->{}", f.follower, f.following),
            Record::Engagement(e) => format!("{}#{}", e.referencing, e.kind),
        }
    }
}
