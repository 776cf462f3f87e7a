//! File-backed subscription store.
//!
//! Each subscription is an empty marker file at `<root>/<event type>/<queue>`.
//! Creating or deleting one file is atomic, so concurrent writers (threads or
//! processes) never lose each other's registrations.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::SubscriptionStore;
use crate::error::{BusError, Result};
use crate::transport::{validate_name, TransportError};

/// Durable subscription store rooted at a directory.
#[derive(Clone, Debug)]
pub struct FileSubscriptionStore {
    root: PathBuf,
}

impl FileSubscriptionStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(io_error)?;
        Ok(Self { root })
    }

    fn list(dir: &Path) -> Result<BTreeSet<String>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(err) => return Err(io_error(err)),
        };

        let mut names = BTreeSet::new();
        for entry in entries {
            let name = entry.map_err(io_error)?.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') {
                names.insert(name);
            }
        }
        Ok(names)
    }
}

fn io_error(err: std::io::Error) -> BusError {
    TransportError::Io(err).into()
}

impl SubscriptionStore for FileSubscriptionStore {
    fn register(&self, event_type: &str, queue: &str) -> Result<()> {
        validate_name(event_type)?;
        validate_name(queue)?;

        let dir = self.root.join(event_type);
        fs::create_dir_all(&dir).map_err(io_error)?;
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dir.join(queue))
        {
            Ok(_) => {
                debug!(event_type, queue, "subscription registered");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(err) => Err(io_error(err)),
        }
    }

    fn unregister(&self, event_type: &str, queue: &str) -> Result<()> {
        validate_name(event_type)?;
        validate_name(queue)?;

        match fs::remove_file(self.root.join(event_type).join(queue)) {
            Ok(()) => {
                debug!(event_type, queue, "subscription removed");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(err)),
        }
    }

    fn subscribers_of(&self, event_type: &str) -> Result<BTreeSet<String>> {
        validate_name(event_type)?;
        Self::list(&self.root.join(event_type))
    }

    fn subscriptions_for(&self, queue: &str) -> Result<BTreeSet<String>> {
        let mut event_types = BTreeSet::new();
        for event_type in Self::list(&self.root)? {
            if self.root.join(&event_type).join(queue).is_file() {
                event_types.insert(event_type);
            }
        }
        Ok(event_types)
    }
}
