//! Durable JSON-lines ledger backend.
//!
//! One sealed entry per line. The chain head is verified on open and then
//! held in memory, so each append is a single `O_APPEND` write followed by
//! an fsync. If the file grew since our last write (another process
//! appended), the head is re-read before sealing.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::entry::{verify_chain, EntryDraft, LedgerEntry, LedgerFilter, GENESIS_DIGEST};
use crate::error::LedgerError;
use crate::storage_traits::{ComplianceLedger, EntryStream};
use crate::LedgerResult;

#[derive(Debug)]
struct ChainHead {
    last_sequence: u64,
    last_digest: String,
    /// File length after our last read or write.
    file_len: u64,
}

impl ChainHead {
    fn from_entries(entries: &[LedgerEntry], file_len: u64) -> Self {
        match entries.last() {
            Some(last) => ChainHead {
                last_sequence: last.sequence_number,
                last_digest: last.digest.as_str().to_string(),
                file_len,
            },
            None => ChainHead {
                last_sequence: 0,
                last_digest: GENESIS_DIGEST.to_string(),
                file_len,
            },
        }
    }
}

/// Append-only ledger stored as JSON lines on the local filesystem.
#[derive(Debug)]
pub struct JsonlLedger {
    path: PathBuf,
    head: Mutex<ChainHead>,
}

impl JsonlLedger {
    /// Open (or create) the ledger at `path`, verifying any existing history.
    ///
    /// Fails with [`LedgerError::Corrupted`] or [`LedgerError::ChainBroken`]
    /// if stored history does not verify; the file is left untouched.
    pub async fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let head = load_head(&path).await?;
        info!(
            path = %path.display(),
            entries = head.last_sequence,
            "compliance ledger opened"
        );

        Ok(Self {
            path,
            head: Mutex::new(head),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and verify the whole file.
    pub async fn verify(&self) -> LedgerResult<usize> {
        let entries = self.read_all().await?;
        verify_chain(&entries)?;
        Ok(entries.len())
    }

    async fn read_all(&self) -> LedgerResult<Vec<LedgerEntry>> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => parse_lines(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn file_len(path: &Path) -> LedgerResult<u64> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

async fn load_head(path: &Path) -> LedgerResult<ChainHead> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    let entries = parse_lines(&content)?;
    verify_chain(&entries)?;
    Ok(ChainHead::from_entries(&entries, content.len() as u64))
}

fn parse_line(line: &str, line_no: usize) -> LedgerResult<LedgerEntry> {
    serde_json::from_str(line).map_err(|e| LedgerError::Corrupted {
        line: line_no,
        reason: e.to_string(),
    })
}

fn parse_lines(content: &str) -> LedgerResult<Vec<LedgerEntry>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| parse_line(l, i + 1))
        .collect()
}

#[async_trait]
impl ComplianceLedger for JsonlLedger {
    async fn append(&self, draft: EntryDraft) -> LedgerResult<u64> {
        let mut head = self.head.lock().await;
        if file_len(&self.path).await? != head.file_len {
            debug!(path = %self.path.display(), "ledger changed on disk, reloading head");
            *head = load_head(&self.path).await?;
        }
        let seq = head.last_sequence + 1;
        let entry = draft.seal(seq, &head.last_digest)?;

        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.sync_data().await?;

        head.file_len = file.metadata().await?.len();
        head.last_sequence = seq;
        head.last_digest = entry.digest.as_str().to_string();
        debug!(seq, entry_type = %entry.entry_type, "ledger entry appended");
        Ok(seq)
    }

    async fn query(&self, filter: LedgerFilter) -> LedgerResult<EntryStream<'static>> {
        let file = match fs::File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Box::pin(stream::empty()));
            }
            Err(e) => return Err(e.into()),
        };
        let lines = BufReader::new(file).lines();

        let entries = stream::unfold(
            (lines, 0usize, filter, false),
            |(mut lines, mut line_no, filter, done)| async move {
                if done {
                    return None;
                }
                loop {
                    line_no += 1;
                    match lines.next_line().await {
                        Ok(Some(line)) if line.trim().is_empty() => continue,
                        Ok(Some(line)) => match parse_line(&line, line_no) {
                            Ok(entry) if filter.matches(&entry) => {
                                return Some((Ok(entry), (lines, line_no, filter, false)));
                            }
                            Ok(_) => continue,
                            Err(e) => return Some((Err(e), (lines, line_no, filter, true))),
                        },
                        Ok(None) => return None,
                        Err(e) => return Some((Err(e.into()), (lines, line_no, filter, true))),
                    }
                }
            },
        );
        Ok(Box::pin(entries))
    }

    async fn last_sequence(&self) -> LedgerResult<Option<u64>> {
        let head = self.head.lock().await;
        Ok((head.last_sequence > 0).then_some(head.last_sequence))
    }
}
