use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use chrono::Utc;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use parking_lot::Mutex;
use crate::core::error::{Error, ErrorKind, Result};
use crate::storage::checkpoint::{self, CheckpointData, Manifest};
use crate::storage::layout::StorageLayout;
use crate::storage::wal::{Operation, WAL};

const PENDING: u8 = 0;
const COMMITTED: u8 = 1;
const TIMED_OUT: u8 = 2;

/// Decides the single outcome of a durable request when the caller's
/// deadline and the worker's completion race.
#[derive(Debug)]
pub struct Ticket {
    state: AtomicU8,
}

impl Ticket {
    fn new() -> Self {
        Ticket { state: AtomicU8::new(PENDING) }
    }

    /// Worker side: succeeds unless the caller already gave up.
    fn try_commit(&self) -> bool {
        self.state
            .compare_exchange(PENDING, COMMITTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Caller side: succeeds unless the worker already committed.
    fn try_time_out(&self) -> bool {
        self.state
            .compare_exchange(PENDING, TIMED_OUT, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_timed_out(&self) -> bool {
        self.state.load(Ordering::Acquire) == TIMED_OUT
    }
}

pub enum Task {
    Append(Operation),
    Checkpoint(Box<CheckpointData>),
}

#[derive(Debug)]
pub enum Outcome {
    Appended(u64),
    Checkpointed(Manifest),
}

enum Message {
    Job {
        task: Task,
        ticket: Arc<Ticket>,
        reply: Sender<Result<Outcome>>,
    },
    Shutdown,
}

/// Owns the WAL and the checkpoint files; every durable write goes through it.
pub struct IoWorker {
    sender: Sender<Message>,
    handle: Mutex<Option<JoinHandle<()>>>,
    timeout: Duration,
}

impl IoWorker {
    pub fn start(storage: StorageLayout, wal: WAL, generation: u64, timeout: Duration) -> Result<Self> {
        let (sender, receiver) = channel::unbounded();
        let state = WorkerState { storage, wal, generation };
        let handle = thread::Builder::new()
            .name("pathdex-io".to_string())
            .spawn(move || state.run(receiver))?;

        Ok(IoWorker {
            sender,
            handle: Mutex::new(Some(handle)),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn append(&self, operation: Operation, timeout: Duration) -> Result<u64> {
        match self.submit(Task::Append(operation), timeout)? {
            Outcome::Appended(sequence) => Ok(sequence),
            other => Err(unexpected(other)),
        }
    }

    pub fn checkpoint(&self, data: CheckpointData, timeout: Duration) -> Result<Manifest> {
        match self.submit(Task::Checkpoint(Box::new(data)), timeout)? {
            Outcome::Checkpointed(manifest) => Ok(manifest),
            other => Err(unexpected(other)),
        }
    }

    /// Hands `task` to the worker and waits at most `timeout`. A timed out
    /// request is either skipped or undone by the worker, never applied.
    pub fn submit(&self, task: Task, timeout: Duration) -> Result<Outcome> {
        let ticket = Arc::new(Ticket::new());
        let (reply, response) = channel::bounded(1);
        self.sender
            .send(Message::Job { task, ticket: ticket.clone(), reply })
            .map_err(|_| Error::new(ErrorKind::InvalidState, "I/O worker has stopped".to_string()))?;

        match response.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                if ticket.try_time_out() {
                    return Err(Error::new(
                        ErrorKind::Timeout,
                        format!("durable write did not complete within {:?}", timeout),
                    ));
                }
                // The worker won the race; its answer is on the way.
                response.recv().map_err(|_| worker_gone())?
            }
            Err(RecvTimeoutError::Disconnected) => Err(worker_gone()),
        }
    }

    /// Drains queued requests and stops the thread. Idempotent.
    pub fn shutdown(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        let _ = self.sender.send(Message::Shutdown);
        if handle.join().is_err() {
            warn!("I/O worker thread panicked");
        }
    }
}

impl Drop for IoWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn unexpected(outcome: Outcome) -> Error {
    Error::new(ErrorKind::Internal, format!("unexpected I/O worker reply {:?}", outcome))
}

fn worker_gone() -> Error {
    Error::new(ErrorKind::Internal, "I/O worker dropped the request".to_string())
}

struct WorkerState {
    storage: StorageLayout,
    wal: WAL,
    generation: u64,
}

impl WorkerState {
    fn run(mut self, receiver: Receiver<Message>) {
        for message in receiver {
            let (task, ticket, reply) = match message {
                Message::Job { task, ticket, reply } => (task, ticket, reply),
                Message::Shutdown => break,
            };
            if ticket.is_timed_out() {
                debug!("skipping request abandoned by its caller");
                continue;
            }

            let result = match task {
                Task::Append(operation) => self.append(operation, &ticket),
                Task::Checkpoint(data) => self.checkpoint(&data, &ticket),
            };
            let _ = reply.send(result);
        }

        if let Err(e) = self.wal.sync() {
            warn!("final WAL sync failed: {}", e);
        }
    }

    fn append(&mut self, operation: Operation, ticket: &Ticket) -> Result<Outcome> {
        let start = self.wal.position;
        let sequence = self.wal.append(operation)?;
        if ticket.try_commit() {
            return Ok(Outcome::Appended(sequence));
        }
        self.wal.undo_last(start)?;
        debug!("undid WAL record {} after caller timeout", sequence);
        Err(Error::new(ErrorKind::Timeout, "caller timed out".to_string()))
    }

    fn checkpoint(&mut self, data: &CheckpointData, ticket: &Ticket) -> Result<Outcome> {
        let generation = self.generation + 1;
        if let Err(e) = checkpoint::write_generation(&self.storage, generation, data) {
            checkpoint::remove_generation(&self.storage, generation);
            return Err(e);
        }
        if !ticket.try_commit() {
            checkpoint::remove_generation(&self.storage, generation);
            return Err(Error::new(ErrorKind::Timeout, "caller timed out".to_string()));
        }

        self.wal.sync()?;
        let manifest = Manifest {
            generation,
            wal_sequence: self.wal.sequence,
            created_at: Utc::now(),
            doc_count: data.documents.documents.iter().filter(|m| m.is_live()).count() as u64,
            term_count: data.postings.len(),
        };
        manifest.save(&self.storage)?;
        self.generation = generation;

        self.wal.rotate(&self.storage)?;
        checkpoint::remove_obsolete(&self.storage, &manifest)?;
        info!("checkpoint generation {} written ({} documents, {} terms, WAL from {})",
              generation, manifest.doc_count, manifest.term_count, manifest.wal_sequence);
        Ok(Outcome::Checkpointed(manifest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DocId;
    use crate::storage::wal::SyncMode;
    use tempfile::TempDir;

    fn remove(source: &str) -> Operation {
        Operation::RemoveDocument { source_id: source.to_string(), doc_id: DocId(0) }
    }

    #[test]
    fn ticket_has_exactly_one_winner() {
        let ticket = Ticket::new();
        assert!(ticket.try_time_out());
        assert!(!ticket.try_commit());

        let ticket = Ticket::new();
        assert!(ticket.try_commit());
        assert!(!ticket.try_time_out());
    }

    #[test]
    fn appends_and_checkpoints_go_through_the_worker() {
        let dir = TempDir::new().unwrap();
        let storage = StorageLayout::new(dir.path().to_path_buf()).unwrap();
        let wal = WAL::open(&storage, 0, SyncMode::Immediate).unwrap();
        let worker = IoWorker::start(storage.clone(), wal, 0, Duration::from_secs(5)).unwrap();

        assert_eq!(worker.append(remove("a"), worker.timeout()).unwrap(), 0);
        assert_eq!(worker.append(remove("b"), worker.timeout()).unwrap(), 1);

        let data = CheckpointData {
            postings: Default::default(),
            visible: Default::default(),
            documents: Default::default(),
        };
        let manifest = worker.checkpoint(data, worker.timeout()).unwrap();
        assert_eq!(manifest.generation, 1);
        assert_eq!(manifest.wal_sequence, 2);

        let files = WAL::find_wal_files(&storage).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, 2);

        worker.shutdown();
        let err = worker.append(remove("c"), Duration::from_millis(50)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn record_is_undone_when_the_caller_gives_up_mid_write() {
        let dir = TempDir::new().unwrap();
        let storage = StorageLayout::new(dir.path().to_path_buf()).unwrap();
        let wal = WAL::open(&storage, 0, SyncMode::Immediate).unwrap();
        let mut state = WorkerState { storage: storage.clone(), wal, generation: 0 };

        assert!(matches!(state.append(remove("a"), &Ticket::new()), Ok(Outcome::Appended(0))));
        let before = state.wal.position;

        // The deadline passes after the request was picked up, before it commits.
        let abandoned = Ticket::new();
        assert!(abandoned.try_time_out());
        let err = state.append(remove("b"), &abandoned).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(state.wal.position, before);

        assert!(matches!(state.append(remove("c"), &Ticket::new()), Ok(Outcome::Appended(1))));
        let files = WAL::find_wal_files(&storage).unwrap();
        let scan = WAL::scan(&files[0].1).unwrap();
        assert!(!scan.torn_tail);
        let logged: Vec<&str> = scan.entries.iter()
            .map(|entry| match &entry.operation {
                Operation::RemoveDocument { source_id, .. } => source_id.as_str(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(logged, vec!["a", "c"]);
        assert_eq!(scan.entries[1].sequence, 1);
    }
}
