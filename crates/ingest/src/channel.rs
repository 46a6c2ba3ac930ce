use core_model::{ArchiveSource, ArchiveStore, RawMessage, UserMap};
use tracing::{debug, info, warn};

use crate::{ChannelThreads, ImportError, normalize};

/// Imports one channel and returns the number of messages written.
///
/// A file that cannot be read or parsed stops the scan; messages from the files
/// already scanned are still written before the failure is reported.
pub fn import_channel(
    source: &dyn ArchiveSource,
    channel: &str,
    users: &UserMap,
    store: &dyn ArchiveStore,
) -> Result<usize, ImportError> {
    let files = source
        .channel_files(channel)
        .map_err(|source| ImportError::ListChannel {
            channel: channel.to_string(),
            source,
        })?;
    debug!(channel, files = files.len(), "channel files listed");

    let mut threads = ChannelThreads::new();
    let mut scan_error = None;
    for file in &files {
        match read_messages(source, channel, file) {
            Ok(raw) => {
                for msg in raw {
                    threads.absorb(normalize(msg, users));
                }
            }
            Err(err) => {
                warn!(channel, file = %file, error = %err, "stopping channel scan");
                scan_error = Some(err);
                break;
            }
        }
    }

    let total = threads.len();
    let mut written = 0;
    for msg in threads.into_messages() {
        if let Err(source) = store.insert_message(channel, &msg) {
            warn!(channel, written, total, "channel flush stopped");
            let write_error = ImportError::WriteMessage {
                channel: channel.to_string(),
                timestamp: msg.timestamp,
                written,
                source,
            };
            return Err(match scan_error {
                Some(scan_error) => ImportError::Incomplete(vec![scan_error, write_error]),
                None => write_error,
            });
        }
        written += 1;
    }

    match scan_error {
        Some(err) => Err(err),
        None => {
            info!(channel, files = files.len(), messages = total, "channel imported");
            Ok(written)
        }
    }
}

fn read_messages(
    source: &dyn ArchiveSource,
    channel: &str,
    file: &str,
) -> Result<Vec<RawMessage>, ImportError> {
    let bytes = source
        .read_file(channel, file)
        .map_err(|source| ImportError::ReadFile {
            channel: channel.to_string(),
            file: file.to_string(),
            source,
        })?;
    serde_json::from_slice(&bytes).map_err(|source| ImportError::ParseFile {
        channel: channel.to_string(),
        file: file.to_string(),
        source,
    })
}
