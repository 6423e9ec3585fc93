//! Validation of raw upstream payloads into typed records.
//!
//! Upstream items arrive as loosely shaped JSON (GraphQL camelCase, or the
//! snake_case shape older snapshot files used). Everything is validated here
//! into the closed [`Record`] set; items that do not fit are rejected with a
//! [`RecordError`] and never travel further downstream.

use crate::error::RecordError;
use crate::fetch::QueryShape;
use crate::types::{
    Account, Engagement, EngagementKind, EngagementTotals, EntityType, Follow, Post, PostKind,
    Record,
};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// GraphQL parent fields, checked in this order when a post names more
/// than one.
const PARENT_FIELDS: [(&str, PostKind); 3] = [
    ("repostOf", PostKind::Repost),
    ("commentOn", PostKind::Comment),
    ("quoteOf", PostKind::Quote),
];

/// Decode one raw upstream item fetched under `shape`.
///
/// A single item can yield more than one record: a reference item produces the
/// engagement edge and, when it carries content, the referencing post itself.
pub fn decode(
    shape: &QueryShape,
    raw: &Value,
    collected_at: DateTime<Utc>,
) -> Result<Vec<Record>, RecordError> {
    match shape {
        QueryShape::Accounts => {
            let mut account = decode_account(raw)?;
            account.collected_at.get_or_insert(collected_at);
            Ok(vec![Record::Account(account)])
        }
        QueryShape::Posts => {
            let mut post = decode_post(raw)?;
            post.collected_at.get_or_insert(collected_at);
            Ok(vec![Record::Post(post)])
        }
        QueryShape::Following { account } => {
            Ok(vec![Record::Follow(decode_following(account, raw)?)])
        }
        QueryShape::References { post } => {
            let (engagement, referencing) = decode_reference(post, raw)?;
            let mut records = vec![Record::Engagement(engagement)];
            if let Some(mut referencing) = referencing {
                referencing.collected_at.get_or_insert(collected_at);
                records.push(Record::Post(referencing));
            }
            Ok(records)
        }
    }
}

pub fn decode_account(raw: &Value) -> Result<Account, RecordError> {
    let key = first_str(raw, &[&["address"], &["key"], &["profile_id"], &["owned_by"]])
        .ok_or_else(|| RecordError::new("account", "missing address"))?;

    Ok(Account {
        key,
        handle: first_str(raw, &[&["username", "localName"], &["handle"]]),
        display_name: first_str(raw, &[&["metadata", "name"], &["display_name"], &["name"]]),
        bio: first_str(raw, &[&["metadata", "bio"], &["bio"]]),
        follower_count: first_u64(raw, &[&["stats", "followers"], &["follower_count"]]),
        following_count: first_u64(raw, &[&["stats", "following"], &["following_count"]]),
        post_count: first_u64(raw, &[&["stats", "posts"], &["post_count"]]),
        created_at: first_time(raw, &[&["createdAt"], &["created_at"]]),
        collected_at: first_time(raw, &[&["collected_at"]]),
        synthetic: false,
    })
}

pub fn decode_post(raw: &Value) -> Result<Post, RecordError> {
    let key = first_str(raw, &[&["id"], &["key"]])
        .ok_or_else(|| RecordError::new("post", "missing id"))?;
    let author = first_str(raw, &[&["author", "address"], &["author"], &["author_address"]])
        .ok_or_else(|| RecordError::new("post", format!("post {} has no author", key)))?;

    let (kind, parent) = post_kind_and_parent(raw);

    Ok(Post {
        key,
        author: Some(author),
        created_at: first_time(raw, &[&["timestamp"], &["createdAt"], &["created_at"]]),
        content_uri: first_str(raw, &[&["contentUri"], &["content_uri"]]),
        kind,
        parent,
        totals: decode_totals(raw),
        collected_at: first_time(raw, &[&["collected_at"]]),
        synthetic: false,
    })
}

fn decode_following(follower: &str, raw: &Value) -> Result<Follow, RecordError> {
    let following = first_str(
        raw,
        &[
            &["following", "address"],
            &["following"],
            &["following_address"],
        ],
    )
    .ok_or_else(|| RecordError::new("follow", "missing following address"))?;

    if following == follower {
        return Err(RecordError::new("follow", "self-follow"));
    }

    Ok(Follow {
        follower: follower.to_string(),
        following,
        followed_on: first_time(raw, &[&["followedOn"], &["followed_on"]]),
    })
}

fn decode_reference(
    target: &str,
    raw: &Value,
) -> Result<(Engagement, Option<Post>), RecordError> {
    let referencing = first_str(raw, &[&["id"], &["ref_post_id"]])
        .ok_or_else(|| RecordError::new("engagement", "reference without id"))?;
    let actor = first_str(
        raw,
        &[&["author", "address"], &["sender", "address"], &["user_address"]],
    )
    .ok_or_else(|| RecordError::new("engagement", format!("reference {} has no actor", referencing)))?;

    let (own_kind, own_parent) = post_kind_and_parent(raw);
    let kind = match first_str(raw, &[&["referenceType"], &["engagement_type"], &["kind"]]) {
        Some(s) => s
            .parse::<EngagementKind>()
            .map_err(|e| RecordError::new("engagement", e))?,
        // An unlabelled item may name several parents; the one pointing at
        // `target` decides the kind.
        None => PARENT_FIELDS
            .iter()
            .find(|(field, _)| first_str(raw, &[&[*field, "id"]]).as_deref() == Some(target))
            .map(|(_, post_kind)| *post_kind)
            .or(Some(own_kind))
            .and_then(EngagementKind::from_post_kind)
            .ok_or_else(|| {
                RecordError::new(
                    "engagement",
                    format!("cannot tell how {} references {}", referencing, target),
                )
            })?,
    };

    let timestamp = first_time(raw, &[&["timestamp"], &["createdAt"]]);

    let engagement = Engagement {
        actor: actor.clone(),
        target: target.to_string(),
        referencing: referencing.clone(),
        kind,
        timestamp,
    };

    // The referencing post keeps its own parent when it names one.
    let (post_kind, parent) = match own_parent {
        Some(parent) => (own_kind, parent),
        None => (
            match kind {
                EngagementKind::Comment => PostKind::Comment,
                EngagementKind::Repost => PostKind::Repost,
                _ => PostKind::Quote,
            },
            target.to_string(),
        ),
    };
    let post = kind.carries_content().then(|| Post {
        key: referencing,
        author: Some(actor),
        created_at: timestamp,
        content_uri: first_str(raw, &[&["contentUri"]]),
        kind: post_kind,
        parent: Some(parent),
        totals: decode_totals(raw),
        collected_at: None,
        synthetic: false,
    });

    Ok((engagement, post))
}

/// Decode one record of a stored snapshot file holding `entity` records.
///
/// Snapshot files use the record field names, but files written by older
/// collectors are accepted too.
pub fn decode_stored(entity: EntityType, raw: &Value) -> Result<Record, RecordError> {
    match entity {
        EntityType::Accounts => decode_account(raw).map(Record::Account),
        EntityType::Posts => decode_post(raw).map(Record::Post),
        EntityType::Follows => decode_follow(raw).map(Record::Follow),
        EntityType::Engagements => decode_engagement(raw).map(Record::Engagement),
    }
}

pub fn decode_follow(raw: &Value) -> Result<Follow, RecordError> {
    let follower = first_str(raw, &[&["follower"], &["follower_address"]])
        .ok_or_else(|| RecordError::new("follow", "missing follower"))?;
    decode_following(&follower, raw)
}

pub fn decode_engagement(raw: &Value) -> Result<Engagement, RecordError> {
    let field = |paths: &[&[&str]], what: &str| {
        first_str(raw, paths)
            .ok_or_else(|| RecordError::new("engagement", format!("missing {}", what)))
    };
    let actor = field(&[&["actor"], &["user_address"]], "actor")?;
    let target = field(&[&["target"], &["target_post_id"]], "target")?;
    let referencing = field(&[&["referencing"], &["ref_post_id"]], "referencing post")?;
    let kind = field(&[&["kind"], &["engagement_type"]], "kind")?
        .parse::<EngagementKind>()
        .map_err(|e| RecordError::new("engagement", e))?;

    Ok(Engagement {
        actor,
        target,
        referencing,
        kind,
        timestamp: first_time(raw, &[&["timestamp"]]),
    })
}

/// Engagements implied by the posts themselves: any repost, comment or quote
/// that names its parent is an edge no extra request is needed for.
pub fn derive_engagements(posts: &[Post]) -> Vec<Engagement> {
    posts
        .iter()
        .filter_map(|post| {
            let kind = EngagementKind::from_post_kind(post.kind)?;
            Some(Engagement {
                actor: post.author.clone()?,
                target: post.parent.clone()?,
                referencing: post.key.clone(),
                kind,
                timestamp: post.created_at,
            })
        })
        .collect()
}

fn post_kind_and_parent(raw: &Value) -> (PostKind, Option<String>) {
    for (field, kind) in PARENT_FIELDS {
        if let Some(parent) = first_str(raw, &[&[field, "id"]]) {
            return (kind, Some(parent));
        }
    }

    let parent = first_str(raw, &[&["parent"]]);
    let kind = first_str(raw, &[&["kind"], &["__typename"], &["post_kind"]])
        .and_then(|s| s.parse::<PostKind>().ok())
        .unwrap_or(if parent.is_some() {
            PostKind::Unknown
        } else {
            PostKind::Original
        });
    (kind, parent)
}

fn decode_totals(raw: &Value) -> Option<EngagementTotals> {
    let stats = raw
        .get("stats")
        .or_else(|| raw.get("totals"))
        .filter(|v| v.is_object())?;
    let mut totals = EngagementTotals::default();
    for kind in EngagementKind::ALL {
        let plural = format!("{}s", kind.as_str());
        let value = first_u64(stats, &[&[plural.as_str()], &[kind.as_str()]]).unwrap_or(0);
        totals.set(kind, value);
    }
    Some(totals)
}

fn lookup<'a>(raw: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(raw, |v, key| v.get(key))
}

fn first_str(raw: &Value, paths: &[&[&str]]) -> Option<String> {
    paths.iter().find_map(|path| {
        lookup(raw, path)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

fn first_u64(raw: &Value, paths: &[&[&str]]) -> Option<u64> {
    paths.iter().find_map(|path| match lookup(raw, path)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn first_time(raw: &Value, paths: &[&[&str]]) -> Option<DateTime<Utc>> {
    paths.iter().find_map(|path| match lookup(raw, path)? {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => n.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    })
}

/// Accepts RFC 3339, or a naive ISO timestamp which is taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_decode_graphql_account() {
        let raw = json!({
            "address": "0xabc",
            "createdAt": "2024-05-01T10:00:00Z",
            "username": { "localName": "alice" },
            "metadata": { "bio": "hi", "name": "Alice" },
            "stats": { "followers": 10, "following": "4" }
        });
        let records = decode(&QueryShape::Accounts, &raw, now()).unwrap();
        let Record::Account(account) = &records[0] else {
            panic!("expected account");
        };
        assert_eq!(account.key, "0xabc");
        assert_eq!(account.handle.as_deref(), Some("alice"));
        assert_eq!(account.follower_count, Some(10));
        assert_eq!(account.following_count, Some(4));
        assert_eq!(account.collected_at, Some(now()));
        assert!(!account.synthetic);
    }

    #[test]
    fn test_decode_rejects_account_without_address() {
        let err = decode(&QueryShape::Accounts, &json!({ "handle": "x" }), now()).unwrap_err();
        assert_eq!(err.entity, "account");
    }

    #[test]
    fn test_decode_repost_post_has_parent() {
        let raw = json!({
            "__typename": "Repost",
            "id": "0x01-0x02",
            "timestamp": "2024-05-01T10:00:00",
            "repostOf": { "id": "0x01-0x01" },
            "author": { "address": "0xbob" }
        });
        let post = decode_post(&raw).unwrap();
        assert_eq!(post.kind, PostKind::Repost);
        assert_eq!(post.parent.as_deref(), Some("0x01-0x01"));
        assert!(post.created_at.is_some());

        let derived = derive_engagements(&[post]);
        assert_eq!(derived.len(), 1);
        assert_eq!(derived[0].target, "0x01-0x01");
        assert_eq!(derived[0].kind, EngagementKind::Repost);
    }

    #[test]
    fn test_decode_reference_yields_edge_and_post() {
        let shape = QueryShape::References {
            post: "p1".into(),
        };
        let raw = json!({
            "id": "p2",
            "referenceType": "COMMENT_ON",
            "author": { "address": "0xcarol" },
            "stats": { "comments": 2 }
        });
        let records = decode(&shape, &raw, now()).unwrap();
        assert_eq!(records.len(), 2);
        let Record::Engagement(e) = &records[0] else {
            panic!("expected engagement");
        };
        assert_eq!(e.kind, EngagementKind::Comment);
        assert_eq!(e.target, "p1");
        let Record::Post(p) = &records[1] else {
            panic!("expected post");
        };
        assert_eq!(p.parent.as_deref(), Some("p1"));
        assert_eq!(p.totals.unwrap().comments, 2);
    }

    #[test]
    fn test_unlabelled_reference_kind_follows_matching_parent() {
        let shape = QueryShape::References {
            post: "P".into(),
        };
        let raw = json!({
            "id": "r1",
            "author": { "address": "0xcarol" },
            "commentOn": { "id": "Q" },
            "quoteOf": { "id": "P" }
        });
        let records = decode(&shape, &raw, now()).unwrap();
        let Record::Engagement(e) = &records[0] else {
            panic!("expected engagement");
        };
        assert_eq!(e.kind, EngagementKind::Quote);
        assert_eq!(e.target, "P");
        let Record::Post(p) = &records[1] else {
            panic!("expected post");
        };
        assert_eq!(p.kind, PostKind::Comment);
        assert_eq!(p.parent.as_deref(), Some("Q"));

        // The post's own comment edge still comes out of derivation.
        let derived = derive_engagements(std::slice::from_ref(p));
        assert_eq!(derived.len(), 1);
        assert_eq!(derived[0].kind, EngagementKind::Comment);
        assert_eq!(derived[0].target, "Q");
    }

    #[test]
    fn test_decode_tip_reference_has_no_post() {
        let shape = QueryShape::References {
            post: "p1".into(),
        };
        let raw = json!({ "id": "tx9", "kind": "tip", "sender": { "address": "0xdan" } });
        let records = decode(&shape, &raw, now()).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_decode_following_rejects_self_follow() {
        let shape = QueryShape::Following {
            account: "0xa".into(),
        };
        assert!(decode(&shape, &json!({ "following": { "address": "0xa" } }), now()).is_err());
        let ok = decode(&shape, &json!({ "following": { "address": "0xb" } }), now()).unwrap();
        assert_eq!(ok[0], Record::Follow(Follow::new("0xa", "0xb")));
    }

    #[test]
    fn test_decode_stored_round_trips_own_format() {
        let engagement = Engagement {
            actor: "0xu".into(),
            target: "p1".into(),
            referencing: "p2".into(),
            kind: EngagementKind::Quote,
            timestamp: Some(now()),
        };
        let raw = serde_json::to_value(&engagement).unwrap();
        assert_eq!(
            decode_stored(EntityType::Engagements, &raw).unwrap(),
            Record::Engagement(engagement)
        );

        let mut post = Post::new("p2", "0xu");
        post.kind = PostKind::Quote;
        post.parent = Some("p1".into());
        let raw = serde_json::to_value(&post).unwrap();
        assert_eq!(decode_stored(EntityType::Posts, &raw).unwrap(), Record::Post(post));
    }

    #[test]
    fn test_decode_stored_accepts_legacy_follow_fields() {
        let raw = json!({ "follower_address": "0xa", "following_address": "0xb" });
        let record = decode_stored(EntityType::Follows, &raw).unwrap();
        assert_eq!(record, Record::Follow(Follow::new("0xa", "0xb")));
        assert!(decode_stored(EntityType::Follows, &json!({ "following": "0xb" })).is_err());
    }
}
