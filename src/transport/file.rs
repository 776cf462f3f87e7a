//! File-backed durable queue store.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/
//!   PaymentCalculationService/
//!     00001718000000000000-0000004242.msg
//!     00001718000000000001-0000004242.msg
//!   PaymentCalculationService.dead-letter/
//!     00001718000000000777-0000004242.msg
//!     00001718000000000777-0000004242.reason
//! ```
//!
//! File names start with a zero-padded, per-process monotonic timestamp so
//! lexical order is send order. Writes go to a hidden temp file first and are
//! renamed into place, so a reader never sees a half-written message. In-flight
//! state is kept in memory only: if the process dies between dequeue and ack,
//! the file is still there and the message is delivered again after restart.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use super::{
    dead_letter_queue_for, name_problem, Delivery, DeliveryHandle, QueueStore, TransportError,
};

const MESSAGE_EXT: &str = "msg";
const REASON_EXT: &str = "reason";
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Durable queue store keeping one file per message.
///
/// Clones share the same in-flight bookkeeping, so one process should hold
/// one `FileQueueStore` per root. Other processes may enqueue into the same
/// root concurrently.
#[derive(Clone, Debug)]
pub struct FileQueueStore {
    root: PathBuf,
    in_flight: Arc<Mutex<HashSet<(String, String)>>>,
    last_stamp: Arc<AtomicU64>,
}

impl FileQueueStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// Failing to create the root directory is fatal for the caller: there is
    /// nowhere to keep messages.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, TransportError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "opened file queue store");
        Ok(Self {
            root,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            last_stamp: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn queue_dir(&self, queue: &str) -> Result<PathBuf, TransportError> {
        if let Some(reason) = name_problem(queue) {
            return Err(TransportError::InvalidName {
                name: queue.to_string(),
                reason,
            });
        }
        Ok(self.root.join(queue))
    }

    fn existing_queue_dir(&self, queue: &str) -> Result<PathBuf, TransportError> {
        let dir = self.queue_dir(queue)?;
        if !dir.is_dir() {
            return Err(TransportError::QueueNotFound(queue.to_string()));
        }
        Ok(dir)
    }

    fn lock_in_flight(
        &self,
        operation: &'static str,
    ) -> Result<MutexGuard<'_, HashSet<(String, String)>>, TransportError> {
        self.in_flight
            .lock()
            .map_err(|_| TransportError::LockPoisoned(operation))
    }

    /// Next file stem: strictly increasing within this process.
    fn next_stem(&self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let mut last = self.last_stamp.load(Ordering::SeqCst);
        let stamp = loop {
            let candidate = now.max(last + 1);
            match self.last_stamp.compare_exchange(
                last,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break candidate,
                Err(actual) => last = actual,
            }
        };
        format!("{:020}-{:010}", stamp, std::process::id())
    }

    fn write_atomic(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<(), TransportError> {
        let tmp = dir.join(format!(".{}.tmp", file_name));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, dir.join(file_name))?;
        Ok(())
    }

    /// Message file names in the queue directory, oldest first.
    fn message_files(dir: &Path) -> Result<Vec<String>, TransportError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') && name.ends_with(&format!(".{}", MESSAGE_EXT)) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn take_in_flight(&self, handle: &DeliveryHandle) -> Result<PathBuf, TransportError> {
        let key = (handle.queue().to_string(), handle.receipt().to_string());
        if !self.lock_in_flight("settle")?.remove(&key) {
            return Err(TransportError::UnknownDelivery(handle.clone()));
        }
        Ok(self.queue_dir(handle.queue())?.join(handle.receipt()))
    }

    /// Remove a settled file. A missing file means a previous settle already
    /// removed it; that is harmless.
    fn remove_settled(path: &Path) -> Result<(), TransportError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "settled message file already gone");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl QueueStore for FileQueueStore {
    fn create_queue(&self, queue: &str) -> Result<(), TransportError> {
        fs::create_dir_all(self.queue_dir(queue)?)?;
        Ok(())
    }

    fn queue_exists(&self, queue: &str) -> Result<bool, TransportError> {
        Ok(self.queue_dir(queue)?.is_dir())
    }

    fn enqueue(&self, queue: &str, body: Vec<u8>) -> Result<(), TransportError> {
        let dir = self.existing_queue_dir(queue)?;
        let name = format!("{}.{}", self.next_stem(), MESSAGE_EXT);
        Self::write_atomic(&dir, &name, &body)
    }

    fn dequeue(&self, queue: &str, timeout: Duration) -> Result<Option<Delivery>, TransportError> {
        let dir = self.existing_queue_dir(queue)?;
        let deadline = Instant::now() + timeout;

        loop {
            for name in Self::message_files(&dir)? {
                let key = (queue.to_string(), name.clone());
                let mut in_flight = self.lock_in_flight("dequeue")?;
                if in_flight.contains(&key) {
                    continue;
                }

                let body = match fs::read(dir.join(&name)) {
                    Ok(body) => body,
                    // Settled by another handle between listing and reading.
                    Err(err) if err.kind() == ErrorKind::NotFound => continue,
                    Err(err) => return Err(err.into()),
                };
                in_flight.insert(key);

                return Ok(Some(Delivery {
                    handle: DeliveryHandle::new(queue, name),
                    body,
                }));
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn ack(&self, handle: &DeliveryHandle) -> Result<(), TransportError> {
        let path = self.take_in_flight(handle)?;
        Self::remove_settled(&path)?;

        // Dead-letter queues keep a reason sidecar per message.
        match fs::remove_file(path.with_extension(REASON_EXT)) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    fn nack(&self, handle: &DeliveryHandle) -> Result<(), TransportError> {
        self.take_in_flight(handle)?;
        Ok(())
    }

    fn release(&self, handle: &DeliveryHandle, body: Vec<u8>) -> Result<(), TransportError> {
        let key = (handle.queue().to_string(), handle.receipt().to_string());
        if !self.lock_in_flight("release")?.contains(&key) {
            return Err(TransportError::UnknownDelivery(handle.clone()));
        }
        // Rewritten under the same name, so the message keeps its position.
        Self::write_atomic(&self.queue_dir(handle.queue())?, handle.receipt(), &body)?;
        self.take_in_flight(handle)?;
        Ok(())
    }

    fn dead_letter(
        &self,
        handle: &DeliveryHandle,
        body: Vec<u8>,
        reason: &str,
    ) -> Result<(), TransportError> {
        let path = self.take_in_flight(handle)?;

        let dlq = self.queue_dir(&dead_letter_queue_for(handle.queue()))?;
        fs::create_dir_all(&dlq)?;
        let stem = self.next_stem();
        Self::write_atomic(&dlq, &format!("{}.{}", stem, REASON_EXT), reason.as_bytes())?;
        Self::write_atomic(&dlq, &format!("{}.{}", stem, MESSAGE_EXT), &body)?;

        Self::remove_settled(&path)
    }

    fn depth(&self, queue: &str) -> Result<usize, TransportError> {
        let dir = self.existing_queue_dir(queue)?;
        let files = Self::message_files(&dir)?;
        let in_flight = self.lock_in_flight("depth")?;
        Ok(files
            .into_iter()
            .filter(|name| !in_flight.contains(&(queue.to_string(), name.clone())))
            .count())
    }
}
