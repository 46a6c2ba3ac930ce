use std::{collections::BTreeMap, sync::OnceLock};

use core_model::{
    Attachment, DELETED_FILE_TITLE, RawMessage, StoredMessage, UserMap, is_top_level,
};
use regex::{Captures, Regex};

static MENTION: OnceLock<Regex> = OnceLock::new();
static COMMENT_NOTICE: OnceLock<Regex> = OnceLock::new();

fn mention_pattern() -> &'static Regex {
    MENTION.get_or_init(|| Regex::new(r"<@(U[A-Z0-9]{8})>").expect("mention pattern"))
}

fn comment_notice_pattern() -> &'static Regex {
    COMMENT_NOTICE.get_or_init(|| {
        Regex::new(r"<@(U[A-Z0-9]{8})> commented on ").expect("comment pattern")
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.is_empty())
}

/// Converts one exported message into its stored form. Never fails: absent or
/// malformed optional fields end up empty.
pub fn normalize(raw: RawMessage, users: &UserMap) -> StoredMessage {
    let author = resolve_author(&raw, users);
    let text = rewrite_mentions(&raw.text, users);
    let parent_timestamp =
        non_empty(raw.parent_timestamp.as_deref()).filter(|p| *p != raw.timestamp);
    let subtype = non_empty(raw.subtype.as_deref());
    let is_top_level = is_top_level(&raw.timestamp, parent_timestamp, subtype);

    let mut attachments: Vec<Attachment> = raw
        .attachments
        .into_iter()
        .filter(|a| !a.url.is_empty() || !a.fallback_text.is_empty())
        .collect();
    attachments.extend(raw.files.into_iter().map(|f| {
        if f.url.is_empty() {
            Attachment {
                title: DELETED_FILE_TITLE.to_string(),
                ..Attachment::default()
            }
        } else {
            Attachment {
                url: f.url,
                fallback_text: String::new(),
                title: f.title,
            }
        }
    }));

    let reactions: BTreeMap<String, Vec<String>> = raw
        .reactions
        .into_iter()
        .map(|r| {
            let names: Vec<String> = r
                .users
                .iter()
                .map(|id| users.get(id).map(|u| u.real_name.clone()).unwrap_or_default())
                .collect();
            (r.name, names)
        })
        .collect();

    StoredMessage {
        parent_timestamp: parent_timestamp.map(str::to_string),
        subtype: subtype.map(str::to_string),
        timestamp: raw.timestamp,
        text,
        author,
        is_top_level,
        attachments,
        reactions,
        reply_timestamps: Vec::new(),
    }
}

fn resolve_author(raw: &RawMessage, users: &UserMap) -> String {
    let key = non_empty(raw.author_user_id.as_deref())
        .or_else(|| {
            comment_notice_pattern()
                .captures(&raw.text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str())
        })
        .or(raw.author_username.as_deref())
        .unwrap_or_default();
    users
        .get(key)
        .map(|u| u.real_name.clone())
        .unwrap_or_else(|| key.to_string())
}

fn rewrite_mentions(text: &str, users: &UserMap) -> String {
    mention_pattern()
        .replace_all(text, |caps: &Captures<'_>| match users.get(&caps[1]) {
            Some(user) => format!("@{}", user.display_name),
            None => "@<unknown>".to_string(),
        })
        .into_owned()
}
