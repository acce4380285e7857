//! Bounded FIFO queue of checks to re-run once the origin is reachable.

use std::collections::VecDeque;

use tracing::debug;

use crate::ports::CheckRequest;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryTask {
    pub request: CheckRequest,
    pub attempts: u32,
    /// Clock time the task was queued (Unix milliseconds)
    pub scheduled_at: u64,
}

#[derive(Debug)]
pub struct RetryQueue {
    tasks: VecDeque<RetryTask>,
    capacity: usize,
}

impl RetryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            tasks: VecDeque::new(),
            capacity,
        }
    }

    /// Queues `request` unless an identical one is already waiting. When
    /// full, the oldest task is dropped. Returns false for duplicates.
    pub fn push(&mut self, request: CheckRequest, now: u64) -> bool {
        if self.capacity == 0 || self.tasks.iter().any(|task| task.request == request) {
            return false;
        }
        if self.tasks.len() >= self.capacity {
            if let Some(dropped) = self.tasks.pop_front() {
                debug!(actor_id = %dropped.request.actor_id, "Retry queue full, dropping oldest task");
            }
        }
        self.tasks.push_back(RetryTask {
            request,
            attempts: 0,
            scheduled_at: now,
        });
        true
    }

    /// Puts a task back at the end of the queue after a failed replay.
    pub fn requeue(&mut self, task: RetryTask) {
        if self.tasks.len() < self.capacity {
            self.tasks.push_back(task);
        }
    }

    pub fn pop(&mut self) -> Option<RetryTask> {
        self.tasks.pop_front()
    }

    /// Takes every queued task, oldest first.
    pub fn drain(&mut self) -> Vec<RetryTask> {
        self.tasks.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
