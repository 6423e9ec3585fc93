//! `PageSource` over the upstream GraphQL API.

use async_trait::async_trait;
use lensgraph_core::{
    Cursor, EngagementKind, Page, PageRequest, PageSource, QueryShape, UpstreamConfig, UpstreamError,
};
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

/// Page sizes the API accepts, largest first.
const PAGE_SIZES: [(usize, &str); 2] = [(50, "FIFTY"), (10, "TEN")];

/// `postReferences` lists posts only. Tips never show up in it.
const REFERENCE_KINDS: [EngagementKind; 3] = [
    EngagementKind::Comment,
    EngagementKind::Quote,
    EngagementKind::Repost,
];

const ACCOUNTS_QUERY: &str = r#"
query Accounts($request: AccountsRequest!) {
  accounts(request: $request) {
    items { address createdAt username { localName } metadata { name bio } }
    pageInfo { next }
  }
}"#;

const POSTS_QUERY: &str = r#"
query Posts($request: PostsRequest!) {
  posts(request: $request) {
    items {
      __typename
      ... on Post {
        id timestamp contentUri
        author { address }
        commentOn { id }
        quoteOf { id }
        stats { comments reposts quotes tips }
      }
      ... on Repost { id timestamp author { address } repostOf { id } }
    }
    pageInfo { next }
  }
}"#;

const FOLLOWING_QUERY: &str = r#"
query Following($request: FollowingRequest!) {
  following(request: $request) {
    items { following { address } followedOn }
    pageInfo { next }
  }
}"#;

const REFERENCES_QUERY: &str = r#"
query References($request: PostReferencesRequest!) {
  postReferences(request: $request) {
    items {
      __typename
      ... on Post {
        id timestamp contentUri
        author { address }
        commentOn { id }
        quoteOf { id }
        stats { comments reposts quotes tips }
      }
      ... on Repost { id timestamp author { address } repostOf { id } }
    }
    pageInfo { next }
  }
}"#;

/// Upstream client. One instance per run; the fetcher paces it.
pub struct GraphqlSource {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl GraphqlSource {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            token,
        }
    }

    /// Token is read from the environment variable the config names, if set.
    pub fn from_config(upstream: &UpstreamConfig) -> Self {
        let token = upstream
            .bearer_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|t| !t.trim().is_empty());
        if token.is_none() {
            tracing::debug!("No bearer token configured, sending anonymous requests");
        }
        Self::new(upstream.endpoint.clone(), token)
    }

    /// Whether pages of `page_size` can be requested without the API
    /// returning more items than that.
    pub fn supports_page_size(page_size: usize) -> bool {
        PAGE_SIZES.iter().any(|(size, _)| page_size >= *size)
    }
}

#[async_trait]
impl PageSource for GraphqlSource {
    fn name(&self) -> &str {
        "graphql"
    }

    fn reference_kinds(&self) -> &[EngagementKind] {
        &REFERENCE_KINDS
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, UpstreamError> {
        let (field, query, variables) = build_query(request);

        let mut call = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "query": query, "variables": variables }));
        if let Some(token) = &self.token {
            call = call.bearer_auth(token);
        }

        let resp = call.send().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout
            } else {
                UpstreamError::Transient(format!("request failed: {}", e))
            }
        })?;

        let status = resp.status();
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &body));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| UpstreamError::Fatal(format!("malformed response: {}", e)))?;
        parse_page(field, &body)
    }
}

/// Largest accepted page size not above `page_size`.
fn page_size_enum(page_size: usize) -> &'static str {
    PAGE_SIZES
        .iter()
        .find(|(size, _)| page_size >= *size)
        .map_or("TEN", |(_, name)| *name)
}

fn reference_type(kind: EngagementKind) -> Option<&'static str> {
    match kind {
        EngagementKind::Comment => Some("COMMENT_ON"),
        EngagementKind::Quote => Some("QUOTE_OF"),
        EngagementKind::Repost => Some("REPOST_OF"),
        EngagementKind::Tip => None,
    }
}

/// Response field, query document and variables for one page.
fn build_query(request: &PageRequest) -> (&'static str, &'static str, Value) {
    let mut args = json!({ "pageSize": page_size_enum(request.page_size) });
    if let Some(cursor) = &request.cursor {
        args["cursor"] = json!(cursor.as_str());
    }

    let (field, query) = match &request.shape {
        QueryShape::Accounts => ("accounts", ACCOUNTS_QUERY),
        QueryShape::Posts => ("posts", POSTS_QUERY),
        QueryShape::Following { account } => {
            args["account"] = json!(account);
            args["orderBy"] = json!("DESC");
            ("following", FOLLOWING_QUERY)
        }
        QueryShape::References { post } => {
            args["referencedPost"] = json!(post);
            let types: Vec<&str> = REFERENCE_KINDS.into_iter().filter_map(reference_type).collect();
            args["referenceTypes"] = json!(types);
            args["visibilityFilter"] = json!("PUBLIC");
            args["relevancyFilter"] = json!("LATEST");
            ("postReferences", REFERENCES_QUERY)
        }
    };
    (field, query, json!({ "request": args }))
}

fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> UpstreamError {
    let detail = format!("HTTP {}: {}", status.as_u16(), body.chars().take(200).collect::<String>());
    match status {
        StatusCode::TOO_MANY_REQUESTS => UpstreamError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => UpstreamError::Fatal(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => UpstreamError::Timeout,
        s if s.is_server_error() => UpstreamError::Transient(detail),
        _ => UpstreamError::Fatal(detail),
    }
}

fn parse_page(field: &str, body: &Value) -> Result<Page, UpstreamError> {
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            let messages: Vec<&str> = errors
                .iter()
                .filter_map(|e| e.get("message").and_then(Value::as_str))
                .collect();
            return Err(UpstreamError::Fatal(format!(
                "GraphQL errors: {}",
                messages.join("; ")
            )));
        }
    }

    let node = body
        .get("data")
        .and_then(|d| d.get(field))
        .ok_or_else(|| UpstreamError::Fatal(format!("response has no data.{}", field)))?;
    let items = node
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| UpstreamError::Fatal(format!("data.{} has no items", field)))?
        .clone();
    let next_cursor = node
        .get("pageInfo")
        .and_then(|p| p.get("next"))
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(Cursor::new);

    Ok(Page { items, next_cursor })
}
