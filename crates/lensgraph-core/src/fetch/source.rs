use crate::error::UpstreamError;
use crate::types::{AccountKey, EngagementKind, PostKey};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Opaque continuation token handed out by the upstream.
/// Passed back verbatim; its structure is never inspected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What is being paginated. Each shape has its own checkpoint and
/// may carry its own rate-limit policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum QueryShape {
    /// Global account listing.
    Accounts,

    /// Global publication listing.
    Posts,

    /// Accounts followed by `account`.
    Following { account: AccountKey },

    /// Posts and tips referencing `post`.
    References { post: PostKey },
}

impl QueryShape {
    /// Key used to look up a per-shape fetch policy.
    pub fn policy_key(&self) -> &'static str {
        match self {
            QueryShape::Accounts => "accounts",
            QueryShape::Posts => "posts",
            QueryShape::Following { .. } => "following",
            QueryShape::References { .. } => "references",
        }
    }

    /// Filesystem-safe identifier, unique per shape and argument.
    pub fn checkpoint_id(&self) -> String {
        let arg = match self {
            QueryShape::Accounts | QueryShape::Posts => return self.policy_key().to_string(),
            QueryShape::Following { account } => account,
            QueryShape::References { post } => post,
        };
        let safe: String = arg
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("{}-{}", self.policy_key(), safe)
    }
}

impl fmt::Display for QueryShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryShape::Accounts | QueryShape::Posts => f.write_str(self.policy_key()),
            QueryShape::Following { account } => write!(f, "following({})", account),
            QueryShape::References { post } => write!(f, "references({})", post),
        }
    }
}

/// One page request: `{cursor, page_size, filter}` where the filter is the shape.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub shape: QueryShape,
    pub cursor: Option<Cursor>,
    pub page_size: usize,
}

/// One page of raw upstream items. `next_cursor == None` means no more pages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    pub next_cursor: Option<Cursor>,
}

/// The upstream paginated API. Implementations classify their own failures
/// into rate-limited, transient and fatal.
#[async_trait]
pub trait PageSource: Send + Sync + 'static {
    /// Source name (used in logs).
    fn name(&self) -> &str;

    /// Engagement kinds a references listing can return. Kinds left out are
    /// not compared against reported totals.
    fn reference_kinds(&self) -> &[EngagementKind] {
        &EngagementKind::ALL
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, UpstreamError>;
}
