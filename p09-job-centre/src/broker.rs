//! Priority job broker: multi-queue heaps, a job registry, tombstones,
//! per-worker held-job tracking, and long-poll wakeups.
//!
//! All state lives behind a single `parking_lot::Mutex`, mirroring the
//! single-critical-section discipline Speed Daemon's central controller
//! task uses for its sightings/ticket state.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;

pub type JobId = u64;
pub type WorkerId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeapEntry {
    priority: i64,
    id: JobId,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Ready,
    Held(WorkerId),
    Deleted,
}

#[derive(Debug, Clone)]
struct JobRecord {
    queue: String,
    priority: i64,
    payload: Value,
    state: JobState,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    pub priority: i64,
    pub payload: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum AbortError {
    #[error("job not found or already deleted")]
    NotFound,
    #[error("job is not held by this worker")]
    NotHolder,
}

#[derive(Default)]
struct State {
    next_id: JobId,
    jobs: HashMap<JobId, JobRecord>,
    queues: HashMap<String, BinaryHeap<HeapEntry>>,
    held_by_worker: HashMap<WorkerId, HashSet<JobId>>,
}

impl State {
    fn pop_ready(&mut self, queues: &[String]) -> Option<JobId> {
        loop {
            let mut best: Option<(&str, HeapEntry)> = None;
            for q in queues {
                if let Some(heap) = self.queues.get(q.as_str()) {
                    if let Some(&top) = heap.peek() {
                        if best.map_or(true, |(_, b)| top > b) {
                            best = Some((q.as_str(), top));
                        }
                    }
                }
            }

            let (qname, entry) = best?;
            let qname = qname.to_string();
            self.queues.get_mut(&qname).unwrap().pop();

            match self.jobs.get(&entry.id) {
                Some(job) if job.state == JobState::Ready => return Some(entry.id),
                _ => continue,
            }
        }
    }

    fn requeue(&mut self, id: JobId) {
        if let Some(job) = self.jobs.get(&id) {
            self.queues
                .entry(job.queue.clone())
                .or_default()
                .push(HeapEntry {
                    priority: job.priority,
                    id,
                });
        }
    }
}

pub struct Broker {
    state: Mutex<State>,
    notify: Notify,
    next_worker_id: AtomicU64,
}

impl Default for Broker {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            next_worker_id: AtomicU64::new(0),
        }
    }
}

impl Broker {
    #[must_use]
    pub fn new_worker(self: &Arc<Self>) -> WorkerId {
        usize::try_from(self.next_worker_id.fetch_add(1, AtomicOrdering::Relaxed))
            .expect("worker id counter overflowed usize")
    }

    pub fn put(&self, queue: String, priority: i64, payload: Value) -> JobId {
        let mut state = self.state.lock();

        state.next_id += 1;
        let id = state.next_id;

        state.jobs.insert(
            id,
            JobRecord {
                queue: queue.clone(),
                priority,
                payload,
                state: JobState::Ready,
            },
        );

        state
            .queues
            .entry(queue)
            .or_default()
            .push(HeapEntry { priority, id });

        drop(state);
        self.notify.notify_waiters();

        id
    }

    /// Attempts a single, non-blocking dequeue.
    pub fn try_get(&self, queues: &[String], worker: WorkerId) -> Option<Job> {
        let mut state = self.state.lock();

        let id = state.pop_ready(queues)?;

        let record = state.jobs.get_mut(&id).expect("job vanished mid-dequeue");
        record.state = JobState::Held(worker);

        let job = Job {
            id,
            queue: record.queue.clone(),
            priority: record.priority,
            payload: record.payload.clone(),
        };

        state.held_by_worker.entry(worker).or_default().insert(id);

        Some(job)
    }

    /// Dequeues, suspending until a job is available in one of `queues`
    /// or `cancel` resolves (the owning connection disconnected).
    pub async fn get_wait(
        &self,
        queues: &[String],
        worker: WorkerId,
        cancel: impl std::future::Future<Output = ()>,
    ) -> Option<Job> {
        tokio::pin!(cancel);

        loop {
            let notified = self.notify.notified();

            if let Some(job) = self.try_get(queues, worker) {
                return Some(job);
            }

            tokio::select! {
                () = notified => {}
                () = &mut cancel => return None,
            }
        }
    }

    pub fn delete(&self, id: JobId, deleting_worker: WorkerId) -> bool {
        let mut state = self.state.lock();

        let Some(record) = state.jobs.get_mut(&id) else {
            return false;
        };

        if record.state == JobState::Deleted {
            return false;
        }

        record.state = JobState::Deleted;

        if let Some(held) = state.held_by_worker.get_mut(&deleting_worker) {
            held.remove(&id);
        }

        true
    }

    pub fn abort(&self, id: JobId, worker: WorkerId) -> Result<(), AbortError> {
        let mut state = self.state.lock();

        let Some(record) = state.jobs.get_mut(&id) else {
            return Err(AbortError::NotFound);
        };

        match record.state {
            JobState::Deleted => return Err(AbortError::NotFound),
            JobState::Ready => return Err(AbortError::NotFound),
            JobState::Held(holder) if holder != worker => return Err(AbortError::NotHolder),
            JobState::Held(_) => {}
        }

        record.state = JobState::Ready;

        if let Some(held) = state.held_by_worker.get_mut(&worker) {
            held.remove(&id);
        }

        state.requeue(id);

        drop(state);
        self.notify.notify_waiters();

        Ok(())
    }

    /// Returns every job still held by `worker` to its queue. Called when
    /// a worker's connection closes.
    pub fn disconnect(&self, worker: WorkerId) {
        let mut state = self.state.lock();

        let Some(held) = state.held_by_worker.remove(&worker) else {
            return;
        };

        for id in held {
            if let Some(record) = state.jobs.get_mut(&id) {
                if record.state != JobState::Deleted {
                    record.state = JobState::Ready;
                    state.requeue(id);
                }
            }
        }

        drop(state);
        self.notify.notify_waiters();
    }
}
