use std::{
    collections::HashSet,
    sync::{Mutex, MutexGuard},
};

use core_model::{ArchiveSource, ArchiveStore, StoredMessage, User, UserMap};

pub fn users() -> UserMap {
    let mut users = UserMap::new();
    users.insert(
        "U00000001".to_string(),
        User {
            id: "U00000001".to_string(),
            real_name: "Ann Lee".to_string(),
            display_name: "ann".to_string(),
        },
    );
    users
}

pub const USERS_JSON: &str =
    r#"[{"id":"U00000001","profile":{"real_name":"Ann Lee","display_name":"ann"}}]"#;

/// In-memory archive that hands back files in the order they were added.
pub struct FakeSource {
    users: Option<String>,
    extra_channels: Vec<String>,
    files: Vec<(String, String, Option<String>)>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            users: Some(USERS_JSON.to_string()),
            extra_channels: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn users_json(mut self, body: Option<&str>) -> Self {
        self.users = body.map(str::to_string);
        self
    }

    pub fn file(mut self, channel: &str, name: &str, body: &str) -> Self {
        self.files
            .push((channel.to_string(), name.to_string(), Some(body.to_string())));
        self
    }

    pub fn broken_file(mut self, channel: &str, name: &str) -> Self {
        self.files.push((channel.to_string(), name.to_string(), None));
        self
    }

    /// A channel whose file listing fails.
    pub fn unlistable(mut self, channel: &str) -> Self {
        self.extra_channels.push(channel.to_string());
        self
    }
}

impl ArchiveSource for FakeSource {
    fn describe(&self) -> String {
        "fake archive".to_string()
    }

    fn read_users(&self) -> anyhow::Result<Vec<u8>> {
        self.users
            .as_ref()
            .map(|u| u.clone().into_bytes())
            .ok_or_else(|| anyhow::anyhow!("users.json missing"))
    }

    fn channels(&self) -> anyhow::Result<Vec<String>> {
        let mut out: Vec<String> = Vec::new();
        for name in self
            .files
            .iter()
            .map(|(c, _, _)| c)
            .chain(self.extra_channels.iter())
        {
            if !out.contains(name) {
                out.push(name.clone());
            }
        }
        Ok(out)
    }

    fn channel_files(&self, channel: &str) -> anyhow::Result<Vec<String>> {
        if self.extra_channels.iter().any(|c| c == channel) {
            anyhow::bail!("permission denied");
        }
        Ok(self
            .files
            .iter()
            .filter(|(c, _, _)| c == channel)
            .map(|(_, f, _)| f.clone())
            .collect())
    }

    fn read_file(&self, channel: &str, file: &str) -> anyhow::Result<Vec<u8>> {
        let (_, _, body) = self
            .files
            .iter()
            .find(|(c, f, _)| c == channel && f == file)
            .ok_or_else(|| anyhow::anyhow!("no such file"))?;
        body.as_ref()
            .map(|b| b.clone().into_bytes())
            .ok_or_else(|| anyhow::anyhow!("input/output error"))
    }
}

/// Store that keeps every write in memory and can be told to fail.
#[derive(Default)]
pub struct RecordingStore {
    messages: Mutex<Vec<(String, StoredMessage)>>,
    users: Mutex<Option<UserMap>>,
    fail_after: Option<usize>,
    fail_channels: HashSet<String>,
    fail_users: bool,
}

impl RecordingStore {
    pub fn failing_after(n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::default()
        }
    }

    pub fn failing_channel(mut self, channel: &str) -> Self {
        self.fail_channels.insert(channel.to_string());
        self
    }

    pub fn failing_users(mut self) -> Self {
        self.fail_users = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(String, StoredMessage)>> {
        self.messages.lock().unwrap()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn message(&self, channel: &str, ts: &str) -> Option<StoredMessage> {
        self.lock()
            .iter()
            .find(|(c, m)| c == channel && m.timestamp == ts)
            .map(|(_, m)| m.clone())
    }

    pub fn stored_users(&self) -> Option<UserMap> {
        self.users.lock().unwrap().clone()
    }
}

impl ArchiveStore for RecordingStore {
    fn insert_message(&self, channel: &str, message: &StoredMessage) -> anyhow::Result<()> {
        let mut messages = self.lock();
        if self.fail_channels.contains(channel) {
            anyhow::bail!("database is locked");
        }
        if self.fail_after.is_some_and(|n| messages.len() >= n) {
            anyhow::bail!("disk full");
        }
        messages.push((channel.to_string(), message.clone()));
        Ok(())
    }

    fn insert_users(&self, users: &UserMap) -> anyhow::Result<()> {
        if self.fail_users {
            anyhow::bail!("users table missing");
        }
        *self.users.lock().unwrap() = Some(users.clone());
        Ok(())
    }
}
