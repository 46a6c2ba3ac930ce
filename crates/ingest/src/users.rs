use core_model::{RawUser, SLACKBOT_ID, User, UserMap};

use crate::ImportError;

/// Parses `users.json`. Slackbot is seeded first so the archive can override it;
/// a repeated id keeps its last entry.
pub fn load_users(bytes: &[u8]) -> Result<UserMap, ImportError> {
    let raw: Vec<RawUser> = serde_json::from_slice(bytes).map_err(ImportError::MalformedUsers)?;
    let mut users = UserMap::with_capacity(raw.len() + 1);
    users.insert(SLACKBOT_ID.to_string(), User::slackbot());
    for RawUser { id, profile } in raw {
        let display_name = if profile.display_name.is_empty() {
            profile.real_name.clone()
        } else {
            profile.display_name
        };
        users.insert(
            id.clone(),
            User {
                id,
                real_name: profile.real_name,
                display_name,
            },
        );
    }
    Ok(users)
}
