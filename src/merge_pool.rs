//! Merge Pool
//!
//! Runs bucket merges on background worker threads. Each started merge hands
//! back a [`PendingMerge`] holding its inputs and a one-shot result channel.
//!
//! ```text
//!   add_batch ──start()──► job channel ──► worker 0..N ──merge_buckets()──┐
//!       ▲                                                                 │
//!       └──────────── PendingMerge::resolve() ◄── bounded(1) reply ◄──────┘
//! ```

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use tracing::{debug, error, warn};

use crate::bucket::{Bucket, BucketStore};
use crate::error::Result;
use crate::merge::merge_buckets;

struct MergeJob {
    level: usize,
    newer: Arc<Bucket>,
    older: Arc<Bucket>,
    keep_tombstones: bool,
    reply: Sender<Result<Arc<Bucket>>>,
}

/// A merge that has been started but whose output is not yet installed.
///
/// Until it resolves, readers consult `newer` then `older` in place of the
/// output, which yields the same answers.
#[derive(Clone)]
pub struct PendingMerge {
    newer: Arc<Bucket>,
    older: Arc<Bucket>,
    keep_tombstones: bool,
    result: Receiver<Result<Arc<Bucket>>>,
}

impl std::fmt::Debug for PendingMerge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingMerge")
            .field("newer", &self.newer.hash())
            .field("older", &self.older.hash())
            .field("keep_tombstones", &self.keep_tombstones)
            .finish()
    }
}

impl PendingMerge {
    pub fn newer(&self) -> &Arc<Bucket> {
        &self.newer
    }

    pub fn older(&self) -> &Arc<Bucket> {
        &self.older
    }

    pub fn keep_tombstones(&self) -> bool {
        self.keep_tombstones
    }

    /// Block until the merge output is available.
    ///
    /// If the result was lost (worker gone, or consumed by a discarded copy
    /// of the list) the merge is re-run inline from its inputs.
    pub fn resolve(self, store: &BucketStore) -> Result<Arc<Bucket>> {
        match self.result.recv() {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    newer = %self.newer.hash(),
                    older = %self.older.hash(),
                    "merge result unavailable, re-running inline"
                );
                merge_buckets(store, &self.newer, &self.older, self.keep_tombstones)
            }
        }
    }

    /// Return the output if the merge already finished, otherwise give the
    /// pending merge back
    pub fn try_resolve(self, store: &BucketStore) -> Result<std::result::Result<Arc<Bucket>, Self>> {
        match self.result.try_recv() {
            Ok(result) => result.map(Ok),
            Err(TryRecvError::Empty) => Ok(Err(self)),
            Err(TryRecvError::Disconnected) => self.resolve(store).map(Ok),
        }
    }
}

/// Worker pool for background merges
///
/// With zero threads every merge runs inline inside [`MergePool::start`].
pub struct MergePool {
    store: Arc<BucketStore>,
    jobs: Option<Sender<MergeJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl MergePool {
    pub fn new(store: Arc<BucketStore>, threads: usize) -> Result<Self> {
        if threads == 0 {
            return Ok(Self {
                store,
                jobs: None,
                workers: Vec::new(),
            });
        }

        let (tx, rx) = channel::unbounded::<MergeJob>();
        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let rx = rx.clone();
            let store = Arc::clone(&store);
            let handle = thread::Builder::new()
                .name(format!("bucket-merge-{}", i))
                .spawn(move || Self::worker_loop(&store, rx))?;
            workers.push(handle);
        }
        debug!(threads, "merge pool started");

        Ok(Self {
            store,
            jobs: Some(tx),
            workers,
        })
    }

    /// Start merging `newer` over `older` for `level`
    pub fn start(
        &self,
        level: usize,
        newer: Arc<Bucket>,
        older: Arc<Bucket>,
        keep_tombstones: bool,
    ) -> PendingMerge {
        let (reply, result) = channel::bounded(1);
        let pending = PendingMerge {
            newer: Arc::clone(&newer),
            older: Arc::clone(&older),
            keep_tombstones,
            result,
        };

        let job = MergeJob {
            level,
            newer,
            older,
            keep_tombstones,
            reply,
        };
        match &self.jobs {
            Some(jobs) => {
                if let Err(channel::SendError(job)) = jobs.send(job) {
                    Self::run(&self.store, job);
                }
            }
            None => Self::run(&self.store, job),
        }
        pending
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    fn worker_loop(store: &BucketStore, jobs: Receiver<MergeJob>) {
        for job in jobs.iter() {
            Self::run(store, job);
        }
    }

    fn run(store: &BucketStore, job: MergeJob) {
        let result = merge_buckets(store, &job.newer, &job.older, job.keep_tombstones);
        if let Err(e) = &result {
            error!(level = job.level, error = %e, "bucket merge failed");
        }
        // The receiver may already be gone if the list that owned it was dropped
        let _ = job.reply.send(result);
    }
}

impl Drop for MergePool {
    fn drop(&mut self) {
        self.jobs.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("merge worker panicked");
            }
        }
    }
}
