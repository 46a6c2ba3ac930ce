use std::{
    collections::BTreeMap,
    fs,
    io::{Cursor, Read, Seek},
    path::{Path, PathBuf},
};

use anyhow::Context;
use core_model::{ArchiveSource, USERS_FILE};
use tracing::{debug, warn};

/// An export unpacked on disk: `users.json` plus one directory per channel.
pub struct FolderArchive {
    root: PathBuf,
}

impl FolderArchive {
    pub fn open(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        let meta = fs::metadata(&root)
            .with_context(|| format!("reading archive folder {}", root.display()))?;
        if !meta.is_dir() {
            anyhow::bail!("{} is not a directory", root.display());
        }
        Ok(Self { root })
    }

    fn list(dir: &Path, want_dirs: bool) -> anyhow::Result<Vec<String>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
            let entry = entry?;
            if entry.file_type()?.is_dir() != want_dirs {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => out.push(name),
                Err(name) => warn!(?name, dir = %dir.display(), "skipping non-utf8 entry"),
            }
        }
        Ok(out)
    }
}

impl ArchiveSource for FolderArchive {
    fn describe(&self) -> String {
        format!("folder {}", self.root.display())
    }

    fn read_users(&self) -> anyhow::Result<Vec<u8>> {
        let path = self.root.join(USERS_FILE);
        fs::read(&path).with_context(|| format!("reading {}", path.display()))
    }

    fn channels(&self) -> anyhow::Result<Vec<String>> {
        Self::list(&self.root, true)
    }

    fn channel_files(&self, channel: &str) -> anyhow::Result<Vec<String>> {
        Self::list(&self.root.join(channel), false)
    }

    fn read_file(&self, channel: &str, file: &str) -> anyhow::Result<Vec<u8>> {
        let path = self.root.join(channel).join(file);
        fs::read(&path).with_context(|| format!("reading {}", path.display()))
    }
}

struct ZipEntry {
    name: String,
    data: Result<Vec<u8>, String>,
}

/// A zipped export, indexed and decompressed up front so that channel
/// importers on different threads can read it without sharing a reader.
pub struct ZipArchive {
    label: String,
    users: Option<Vec<u8>>,
    channels: BTreeMap<String, Vec<ZipEntry>>,
}

impl ZipArchive {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file =
            fs::File::open(path).with_context(|| format!("opening zip {}", path.display()))?;
        Self::from_reader(file, format!("zip {}", path.display()))
    }

    pub fn from_bytes(bytes: Vec<u8>, label: impl Into<String>) -> anyhow::Result<Self> {
        Self::from_reader(Cursor::new(bytes), label.into())
    }

    fn from_reader<R: Read + Seek>(reader: R, label: String) -> anyhow::Result<Self> {
        let mut zip =
            zip::ZipArchive::new(reader).with_context(|| format!("reading {label}"))?;
        let mut users = None;
        let mut channels: BTreeMap<String, Vec<ZipEntry>> = BTreeMap::new();
        for i in 0..zip.len() {
            let mut file = zip
                .by_index(i)
                .with_context(|| format!("reading entry {i} of {label}"))?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            if name == USERS_FILE {
                if users.is_none() {
                    let mut buf = Vec::new();
                    file.read_to_end(&mut buf)
                        .with_context(|| format!("reading {USERS_FILE} from {label}"))?;
                    users = Some(buf);
                }
                continue;
            }
            let parts: Vec<&str> = name.split('/').collect();
            let [channel, file_name] = parts.as_slice() else {
                debug!(entry = %name, "ignoring zip entry outside <channel>/<file>");
                continue;
            };
            let mut buf = Vec::new();
            let data = file
                .read_to_end(&mut buf)
                .map(|_| buf)
                .map_err(|e| format!("decompressing {name}: {e}"));
            channels
                .entry(channel.to_string())
                .or_default()
                .push(ZipEntry {
                    name: file_name.to_string(),
                    data,
                });
        }
        debug!(archive = %label, channels = channels.len(), "zip indexed");
        Ok(Self {
            label,
            users,
            channels,
        })
    }
}

impl ArchiveSource for ZipArchive {
    fn describe(&self) -> String {
        self.label.clone()
    }

    fn read_users(&self) -> anyhow::Result<Vec<u8>> {
        self.users
            .clone()
            .with_context(|| format!("{USERS_FILE} missing from {}", self.label))
    }

    fn channels(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.channels.keys().cloned().collect())
    }

    fn channel_files(&self, channel: &str) -> anyhow::Result<Vec<String>> {
        let entries = self
            .channels
            .get(channel)
            .with_context(|| format!("no channel {channel} in {}", self.label))?;
        Ok(entries.iter().map(|e| e.name.clone()).collect())
    }

    fn read_file(&self, channel: &str, file: &str) -> anyhow::Result<Vec<u8>> {
        let entry = self
            .channels
            .get(channel)
            .and_then(|entries| entries.iter().find(|e| e.name == file))
            .with_context(|| format!("no entry {channel}/{file} in {}", self.label))?;
        entry.data.clone().map_err(anyhow::Error::msg)
    }
}
