//! Min-heap of tasks waiting for an agent.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

use crate::Metadata;

/// A task waiting for an agent.
///
/// Ordered by `(priority, created_at, seq)`: lower priority values first,
/// then oldest first. `seq` is the submission counter and keeps equal
/// timestamps in submission order.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub priority: i64,
    pub created_at: DateTime<Utc>,
    pub seq: u64,
    pub task_id: String,
    pub payload: Metadata,
    pub meta: Metadata,
}

impl QueuedTask {
    fn key(&self) -> (i64, DateTime<Utc>, u64) {
        (self.priority, self.created_at, self.seq)
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

#[derive(Debug, Default)]
pub struct PendingQueue {
    heap: BinaryHeap<Reverse<QueuedTask>>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: QueuedTask) {
        self.heap.push(Reverse(task));
    }

    /// Remove the most urgent task.
    pub fn pop(&mut self) -> Option<QueuedTask> {
        self.heap.pop().map(|Reverse(task)| task)
    }

    pub fn peek(&self) -> Option<&QueuedTask> {
        self.heap.peek().map(|Reverse(task)| task)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// All pending tasks in dequeue order.
    pub fn sorted(&self) -> Vec<&QueuedTask> {
        let mut tasks: Vec<&QueuedTask> = self.heap.iter().map(|Reverse(task)| task).collect();
        tasks.sort();
        tasks
    }
}
