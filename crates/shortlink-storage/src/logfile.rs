use crate::memory::InMemoryRepository;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shortlink_core::repository::Result;
use shortlink_core::{
    Generator, OwnedLink, OwnerId, ReadRepository, Repository, SaveOutcome, ShortCode,
    ShortLinkRecord, StorageError,
};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One line of the journal: a link was created (`deleted == false`) or
/// soft-deleted (`deleted == true`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEvent {
    pub uuid: Uuid,
    pub code: ShortCode,
    pub original_url: String,
    pub owner_id: OwnerId,
    pub deleted: bool,
}

impl LinkEvent {
    pub fn new(record: &ShortLinkRecord) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            code: record.code.clone(),
            original_url: record.original_url.clone(),
            owner_id: record.owner_id.clone(),
            deleted: record.deleted,
        }
    }

    fn into_record(self) -> ShortLinkRecord {
        ShortLinkRecord {
            code: self.code,
            original_url: self.original_url,
            owner_id: self.owner_id,
            deleted: self.deleted,
        }
    }
}

/// Events read back from a journal file.
#[derive(Debug, Default)]
struct Replay {
    events: Vec<LinkEvent>,
    /// Length of the prefix made of complete, parseable lines.
    valid_len: u64,
    /// Whether the last complete event is missing its trailing newline.
    missing_newline: bool,
}

fn read_journal(path: &Path) -> Result<Replay> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Replay::default()),
        Err(err) => return Err(err.into()),
    };

    let mut reader = BufReader::new(file);
    let mut replay = Replay::default();
    let mut line = Vec::new();
    let mut line_no = 0_usize;

    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line)?;
        if read == 0 {
            break;
        }
        line_no += 1;

        let terminated = line.ends_with(b"\n");
        let body = line.trim_ascii();
        if body.is_empty() {
            replay.valid_len += read as u64;
            continue;
        }

        match serde_json::from_slice::<LinkEvent>(body) {
            Ok(event) => {
                replay.events.push(event);
                replay.valid_len += read as u64;
                replay.missing_newline = !terminated;
            }
            Err(err) if !terminated => {
                warn!(
                    path = %path.display(),
                    line = line_no,
                    error = %err,
                    "dropping torn event at the end of the journal"
                );
                break;
            }
            Err(err) => {
                return Err(StorageError::InvalidData(format!(
                    "{}:{}: {}",
                    path.display(),
                    line_no,
                    err
                )));
            }
        }
    }

    Ok(replay)
}

fn private_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}

fn open_append(path: &Path) -> std::io::Result<File> {
    private_options().create(true).append(true).open(path)
}

/// Makes a rename inside `path`'s directory durable.
fn sync_parent(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            File::open(parent)?.sync_all()?;
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Runs a section that does blocking journal I/O. On a multi-threaded
/// runtime the worker hands its other tasks off first.
fn run_blocking<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// The append-only file behind [`LogFileRepository`].
#[derive(Debug)]
struct Journal {
    path: PathBuf,
    /// `None` once the journal has been closed.
    file: Option<File>,
    /// Bytes known to hold complete events.
    len: u64,
}

impl Journal {
    fn open(path: &Path) -> Result<(Self, Vec<LinkEvent>)> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let replay = read_journal(path)?;
        let mut file = open_append(path)?;

        let on_disk = file.metadata()?.len();
        if on_disk > replay.valid_len {
            file.set_len(replay.valid_len)?;
        }
        let mut len = replay.valid_len;
        if replay.missing_newline {
            file.write_all(b"\n")?;
            len += 1;
        }

        let journal = Self {
            path: path.to_path_buf(),
            file: Some(file),
            len,
        };
        Ok((journal, replay.events))
    }

    fn append(&mut self, event: &LinkEvent) -> Result<()> {
        let file = self.file.as_mut().ok_or(StorageError::Closed)?;

        let mut line = serde_json::to_vec(event)
            .map_err(|e| StorageError::InvalidData(format!("failed to encode event: {e}")))?;
        line.push(b'\n');

        let written = file.write_all(&line).and_then(|_| file.sync_data());
        if let Err(err) = written {
            // Cut off whatever part of the line reached the disk so the
            // next append starts on a clean line.
            if let Err(truncate_err) = file.set_len(self.len) {
                warn!(path = %self.path.display(), error = %truncate_err, "failed to roll back partial append");
            }
            return Err(err.into());
        }

        self.len += line.len() as u64;
        Ok(())
    }

    /// Replaces the journal with `events` via a temporary file and a rename.
    fn rewrite(&mut self, events: &[LinkEvent]) -> Result<()> {
        if self.file.is_none() {
            return Err(StorageError::Closed);
        }

        let mut tmp_name = self.path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".compact");
        let tmp_path = self.path.with_file_name(tmp_name);

        let mut len = 0_u64;
        {
            let mut tmp = private_options()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            for event in events {
                let mut line = serde_json::to_vec(event).map_err(|e| {
                    StorageError::InvalidData(format!("failed to encode event: {e}"))
                })?;
                line.push(b'\n');
                tmp.write_all(&line)?;
                len += line.len() as u64;
            }
            tmp.sync_all()?;
        }

        std::fs::rename(&tmp_path, &self.path)?;
        sync_parent(&self.path)?;
        self.file = Some(open_append(&self.path)?);
        self.len = len;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        Ok(())
    }
}

/// A [`InMemoryRepository`] made durable by an append-only journal.
///
/// Every create and delete is written to the journal (and synced) while the
/// in-memory lock is held and before the change becomes visible, so the
/// journal order is the order operations were accepted in. On open, the
/// journal is replayed into a fresh in-memory state.
#[derive(Debug)]
pub struct LogFileRepository {
    memory: InMemoryRepository,
    journal: Mutex<Journal>,
}

impl LogFileRepository {
    /// Opens (or creates) the journal at `path` and replays it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let (journal, events) = Journal::open(path)?;

        let memory = InMemoryRepository::new();
        let replayed = events.len();
        for event in events {
            memory.apply(event.into_record());
        }

        info!(
            path = %path.display(),
            events = replayed,
            records = memory.len(),
            "replayed short link journal"
        );

        Ok(Self {
            memory,
            journal: Mutex::new(journal),
        })
    }

    pub fn path(&self) -> PathBuf {
        self.journal.lock().path.clone()
    }

    /// Rewrites the journal so it holds one event per record.
    ///
    /// Tombstones are kept. Writers are blocked for the duration.
    pub fn compact(&self) -> Result<()> {
        run_blocking(|| self.compact_locked())
    }

    fn compact_locked(&self) -> Result<()> {
        self.memory.with_records(|records| {
            let events: Vec<LinkEvent> = records.map(LinkEvent::new).collect();
            let mut journal = self.journal.lock();
            journal.rewrite(&events)?;
            info!(path = %journal.path.display(), events = events.len(), "compacted short link journal");
            Ok(())
        })
    }

    fn append(&self, record: &ShortLinkRecord) -> Result<()> {
        let event = LinkEvent::new(record);
        self.journal.lock().append(&event)?;
        debug!(code = %event.code, deleted = event.deleted, "appended journal event");
        Ok(())
    }
}

#[async_trait]
impl ReadRepository for LogFileRepository {
    // Reads can wait on the memory lock while a writer syncs the journal.
    async fn get(&self, code: &ShortCode) -> Result<Option<ShortLinkRecord>> {
        Ok(run_blocking(|| self.memory.lookup(code)))
    }

    async fn list_by_owner(&self, owner: &OwnerId) -> Result<Vec<OwnedLink>> {
        Ok(run_blocking(|| self.memory.list(owner)))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Repository for LogFileRepository {
    async fn save(
        &self,
        original_url: &str,
        owner: &OwnerId,
        generator: &dyn Generator,
    ) -> Result<SaveOutcome> {
        run_blocking(|| {
            self.memory
                .save_with(original_url, owner, generator, |record| self.append(record))
        })
    }

    async fn save_batch(
        &self,
        original_urls: &[String],
        owner: &OwnerId,
        generator: &dyn Generator,
    ) -> Result<Vec<(String, SaveOutcome)>> {
        run_blocking(|| {
            self.memory
                .save_batch_with(original_urls, owner, generator, |record| self.append(record))
        })
    }

    async fn delete(&self, codes: &[ShortCode], owner: &OwnerId) -> Result<u64> {
        run_blocking(|| {
            self.memory
                .delete_with(codes, owner, |record| self.append(record))
        })
    }

    async fn close(&self) -> Result<()> {
        run_blocking(|| self.journal.lock().close())
    }
}
