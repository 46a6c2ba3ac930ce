use core_model::{ArchiveSource, ArchiveStore, is_hidden};
use rayon::prelude::*;
use tracing::{info, warn};

mod channel;
mod error;
mod normalize;
mod thread;
mod users;

#[cfg(test)]
mod testing;

pub use channel::import_channel;
pub use error::ImportError;
pub use normalize::normalize;
pub use thread::ChannelThreads;
pub use users::load_users;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportPhase {
    Idle,
    UsersLoaded { users: usize },
    ChannelsDispatched { channels: usize },
    Aggregating,
    Done { failures: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub channels: usize,
    pub messages: usize,
    pub users: usize,
}

/// Imports a whole archive: users first, then every visible channel in
/// parallel while the users are written. A failing channel never stops its
/// siblings; all failures come back together as [`ImportError::Incomplete`].
pub fn import_archive(
    source: &dyn ArchiveSource,
    store: &dyn ArchiveStore,
    on_progress: impl Fn(ImportPhase),
) -> Result<ImportSummary, ImportError> {
    on_progress(ImportPhase::Idle);
    info!(archive = %source.describe(), "import start");

    let users = match source
        .read_users()
        .map_err(|source| ImportError::UsersUnavailable { source })
        .and_then(|bytes| load_users(&bytes))
    {
        Ok(users) => users,
        Err(err) => {
            on_progress(ImportPhase::Done { failures: 1 });
            return Err(err);
        }
    };
    on_progress(ImportPhase::UsersLoaded { users: users.len() });

    let mut channels: Vec<String> = match source.channels() {
        Ok(all) => all.into_iter().filter(|c| !is_hidden(c)).collect(),
        Err(source_err) => {
            on_progress(ImportPhase::Done { failures: 1 });
            return Err(ImportError::ArchiveUnreadable {
                archive: source.describe(),
                source: source_err,
            });
        }
    };
    channels.sort();
    on_progress(ImportPhase::ChannelsDispatched {
        channels: channels.len(),
    });

    let (users_written, results) = rayon::join(
        || store.insert_users(&users),
        || {
            channels
                .par_iter()
                .map(|channel| import_channel(source, channel, &users, store))
                .collect::<Vec<_>>()
        },
    );

    on_progress(ImportPhase::Aggregating);
    let mut failures = Vec::new();
    let mut messages = 0;
    for result in results {
        match result {
            Ok(written) => messages += written,
            Err(err) => {
                warn!(channel = err.channel().unwrap_or_default(), error = %err, "channel import failed");
                failures.extend(err.into_failures());
            }
        }
    }
    if let Err(source) = users_written {
        warn!(error = %source, "storing users failed");
        failures.push(ImportError::StoreUsers { source });
    }

    on_progress(ImportPhase::Done {
        failures: failures.len(),
    });
    if !failures.is_empty() {
        return Err(ImportError::Incomplete(failures));
    }
    let summary = ImportSummary {
        channels: channels.len(),
        messages,
        users: users.len(),
    };
    info!(
        channels = summary.channels,
        messages = summary.messages,
        users = summary.users,
        "import done"
    );
    Ok(summary)
}
