//! Durable logical log and recovery replay.
//!
//! Prepared commands are appended per transaction, followed by a commit
//! frame carrying the commit sequence number. Replay scans the file in
//! append order, yielding only transactions whose commit frame made it to
//! disk; a torn tail (incomplete final frame) ends replay cleanly.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::cache::CacheTracker;
use crate::command::Command;
use crate::error::{Result, StoreError};
use crate::locks::LockManager;
use crate::store::GraphStore;
use crate::tx::WriteTransaction;

const MAGIC: [u8; 8] = *b"CHAINLOG";
const VERSION: u16 = 1;
const HEADER_LEN: usize = MAGIC.len() + 2;

const FRAME_COMMAND: u8 = 1;
const FRAME_COMMIT: u8 = 2;
const FRAME_HEADER_LEN: usize = 1 + 8 + 4 + 4;

/// One committed transaction reconstructed from the log.
#[derive(Debug)]
pub struct RecoveredTx {
    pub tx_id: u64,
    pub commit_tx: u64,
    pub commands: Vec<Command>,
}

/// Append-only command log backing crash recovery.
#[derive(Debug)]
pub struct LogicalLog {
    file: Mutex<File>,
}

impl LogicalLog {
    /// Opens (or creates) the log at `path`, validating the file header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path.as_ref())?;
        let len = file.metadata()?.len();
        if len == 0 {
            file.write_all(&MAGIC)?;
            file.write_all(&VERSION.to_be_bytes())?;
            file.sync_all()?;
        } else {
            let mut header = [0u8; HEADER_LEN];
            file.read_exact(&mut header)?;
            if header[..MAGIC.len()] != MAGIC {
                return Err(StoreError::Corruption("log header magic mismatch".into()));
            }
            let version = u16::from_be_bytes([header[8], header[9]]);
            if version != VERSION {
                return Err(StoreError::Corruption(format!(
                    "unsupported log version {version}"
                )));
            }
        }
        file.seek(SeekFrom::End(0))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Appends one prepared command for transaction `tx_id`.
    pub fn append_command(&self, tx_id: u64, command: &Command) -> Result<()> {
        let mut payload = Vec::new();
        command.encode(&mut payload);
        self.append_frame(FRAME_COMMAND, tx_id, &payload)
    }

    /// Appends the commit frame that makes transaction `tx_id` durable.
    pub fn append_commit(&self, tx_id: u64, commit_tx: u64) -> Result<()> {
        self.append_frame(FRAME_COMMIT, tx_id, &commit_tx.to_be_bytes())
    }

    /// Flushes appended frames to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn append_frame(&self, kind: u8, tx_id: u64, payload: &[u8]) -> Result<()> {
        let crc = frame_crc(kind, tx_id, payload);
        let mut file = self.file.lock();
        file.write_all(&[kind])?;
        file.write_all(&tx_id.to_be_bytes())?;
        file.write_all(&(payload.len() as u32).to_be_bytes())?;
        file.write_all(&crc.to_be_bytes())?;
        file.write_all(payload)?;
        Ok(())
    }

    /// Replays the log, returning committed transactions in commit order.
    ///
    /// A frame cut short by a crash ends the scan; a complete frame whose
    /// checksum fails is corruption.
    pub fn committed_transactions(&self) -> Result<Vec<RecoveredTx>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(HEADER_LEN as u64))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        file.seek(SeekFrom::End(0))?;
        drop(file);

        let mut pending: Vec<(u64, Vec<Command>)> = Vec::new();
        let mut committed = Vec::new();
        let mut pos = 0;
        while data.len() - pos >= FRAME_HEADER_LEN {
            let kind = data[pos];
            let tx_id = u64::from_be_bytes(data[pos + 1..pos + 9].try_into().expect("sized"));
            let len =
                u32::from_be_bytes(data[pos + 9..pos + 13].try_into().expect("sized")) as usize;
            let crc = u32::from_be_bytes(data[pos + 13..pos + 17].try_into().expect("sized"));
            let body_start = pos + FRAME_HEADER_LEN;
            if data.len() - body_start < len {
                debug!(offset = pos, "torn frame at log tail, ending replay");
                break;
            }
            let payload = &data[body_start..body_start + len];
            if frame_crc(kind, tx_id, payload) != crc {
                return Err(StoreError::Corruption(format!(
                    "log frame checksum mismatch at offset {pos}"
                )));
            }
            match kind {
                FRAME_COMMAND => {
                    let command = Command::decode(payload)?;
                    match pending.iter_mut().find(|(id, _)| *id == tx_id) {
                        Some((_, commands)) => commands.push(command),
                        None => pending.push((tx_id, vec![command])),
                    }
                }
                FRAME_COMMIT => {
                    if len != 8 {
                        return Err(StoreError::Corruption(
                            "commit frame has malformed payload".into(),
                        ));
                    }
                    let commit_tx = u64::from_be_bytes(payload.try_into().expect("sized"));
                    let commands = pending
                        .iter()
                        .position(|(id, _)| *id == tx_id)
                        .map(|index| pending.remove(index).1)
                        .unwrap_or_default();
                    committed.push(RecoveredTx {
                        tx_id,
                        commit_tx,
                        commands,
                    });
                }
                other => {
                    return Err(StoreError::Corruption(format!(
                        "unknown log frame kind {other}"
                    )));
                }
            }
            pos = body_start + len;
        }
        Ok(committed)
    }
}

/// Replays every committed transaction in the log against `store`.
///
/// Transactions at or below the store's committed counter are skipped, so
/// running recovery twice is a no-op. Id generators are rebuilt from store
/// state once replay finishes.
pub fn recover(
    log: &LogicalLog,
    store: &GraphStore,
    locks: &LockManager,
    cache: &dyn CacheTracker,
) -> Result<usize> {
    store.set_recovering(true);
    let result = replay_all(log, store, locks, cache);
    store.set_recovering(false);
    let replayed = result?;
    store.resync_id_generators();
    info!(replayed, "recovery complete");
    Ok(replayed)
}

fn replay_all(
    log: &LogicalLog,
    store: &GraphStore,
    locks: &LockManager,
    cache: &dyn CacheTracker,
) -> Result<usize> {
    let mut replayed = 0;
    for recovered in log.committed_transactions()? {
        if recovered.commit_tx <= store.last_committed_tx() {
            debug!(
                commit_tx = recovered.commit_tx,
                "transaction already applied, skipping"
            );
            continue;
        }
        let mut tx = WriteTransaction::recovered(recovered.tx_id, store, log, locks, cache);
        for command in recovered.commands {
            tx.inject_command(command)?;
        }
        tx.commit(recovered.commit_tx)?;
        replayed += 1;
    }
    Ok(replayed)
}

fn frame_crc(kind: u8, tx_id: u64, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[kind]);
    hasher.update(&tx_id.to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}
