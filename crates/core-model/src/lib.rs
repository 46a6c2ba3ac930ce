use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Deserializer, Serialize};

pub const SLACKBOT_ID: &str = "USLACKBOT";
pub const SLACKBOT_NAME: &str = "Slackbot";
pub const THREAD_BROADCAST: &str = "thread_broadcast";
pub const DELETED_FILE_TITLE: &str = "This file was deleted.";
pub const USERS_FILE: &str = "users.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub real_name: String,
    pub display_name: String,
}

impl User {
    pub fn slackbot() -> Self {
        Self {
            id: SLACKBOT_ID.to_string(),
            real_name: SLACKBOT_NAME.to_string(),
            display_name: SLACKBOT_NAME.to_string(),
        }
    }
}

pub type UserMap = HashMap<String, User>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawProfile {
    #[serde(default, deserialize_with = "nullable")]
    pub real_name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub display_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawUser {
    pub id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub profile: RawProfile,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "from_url", default, deserialize_with = "nullable")]
    pub url: String,
    #[serde(rename = "fallback", default, deserialize_with = "nullable")]
    pub fallback_text: String,
    #[serde(default, deserialize_with = "nullable")]
    pub title: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileRef {
    #[serde(rename = "permalink", default, deserialize_with = "nullable")]
    pub url: String,
    #[serde(default, deserialize_with = "nullable")]
    pub title: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Reaction {
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub users: Vec<String>,
}

/// One message as it appears in a channel day-file of the export.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMessage {
    #[serde(rename = "ts", default, deserialize_with = "nullable")]
    pub timestamp: String,
    #[serde(default, deserialize_with = "nullable")]
    pub text: String,
    #[serde(rename = "user", default)]
    pub author_user_id: Option<String>,
    #[serde(rename = "username", default)]
    pub author_username: Option<String>,
    #[serde(rename = "thread_ts", default)]
    pub parent_timestamp: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub attachments: Vec<Attachment>,
    #[serde(default, deserialize_with = "nullable")]
    pub files: Vec<FileRef>,
    #[serde(rename = "reactions", default, deserialize_with = "nullable")]
    pub reactions: Vec<Reaction>,
}

/// The normalized form of a message, as written to the store.
///
/// `parent_timestamp` is only set for genuine replies (never equal to
/// `timestamp`). `reply_timestamps` stays sorted ascending without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub timestamp: String,
    pub text: String,
    pub author: String,
    pub parent_timestamp: Option<String>,
    pub subtype: Option<String>,
    pub is_top_level: bool,
    pub attachments: Vec<Attachment>,
    pub reactions: BTreeMap<String, Vec<String>>,
    pub reply_timestamps: Vec<String>,
}

impl StoredMessage {
    /// Stand-in for a thread parent that has not been discovered yet.
    pub fn placeholder(timestamp: &str, first_reply: &str) -> Self {
        Self {
            timestamp: timestamp.to_string(),
            is_top_level: true,
            reply_timestamps: vec![first_reply.to_string()],
            ..Self::default()
        }
    }

    pub fn is_reply(&self) -> bool {
        self.parent_timestamp.is_some()
    }

    pub fn add_reply(&mut self, timestamp: &str) {
        if let Err(pos) = self
            .reply_timestamps
            .binary_search_by(|probe| probe.as_str().cmp(timestamp))
        {
            self.reply_timestamps.insert(pos, timestamp.to_string());
        }
    }

    /// Replaces this entry's content with `incoming` while keeping every
    /// reply already attached to it.
    pub fn merge_content(&mut self, incoming: StoredMessage) {
        let replies = std::mem::take(&mut self.reply_timestamps);
        *self = incoming;
        for ts in replies {
            self.add_reply(&ts);
        }
    }
}

pub fn is_top_level(timestamp: &str, parent_timestamp: Option<&str>, subtype: Option<&str>) -> bool {
    match parent_timestamp {
        None | Some("") => true,
        Some(parent) => parent == timestamp || subtype == Some(THREAD_BROADCAST),
    }
}

/// Names beginning with `.` are never channels.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

pub trait ArchiveStore: Sync {
    fn insert_message(&self, channel: &str, message: &StoredMessage) -> anyhow::Result<()>;
    /// Must ignore ids that are already present.
    fn insert_users(&self, users: &UserMap) -> anyhow::Result<()>;
}

/// A two-level archive: a top-level `users.json` plus `<channel>/<file>` entries.
pub trait ArchiveSource: Sync {
    fn describe(&self) -> String;
    fn read_users(&self) -> anyhow::Result<Vec<u8>>;
    fn channels(&self) -> anyhow::Result<Vec<String>>;
    fn channel_files(&self, channel: &str) -> anyhow::Result<Vec<String>>;
    fn read_file(&self, channel: &str, file: &str) -> anyhow::Result<Vec<u8>>;
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}
