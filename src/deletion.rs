//! Deletion queue: where destroyed resources hand off their GPU-side teardown.
//!
//! Senders live in every resource header and never block. The maintainer
//! (typically the device, once per submit) collects the requests whose last
//! use has completed on the GPU and performs the actual deletion.

use crate::resource::{ResourceId, ResourceKind};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

/// One teardown request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingDestruction {
    pub kind: ResourceKind,
    pub id: ResourceId,
    pub label: Option<String>,
    /// The backing may be deleted once this submission has completed.
    pub after_submission: u64,
}

#[derive(Clone, Debug)]
pub struct DeletionSender(Sender<PendingDestruction>);

impl DeletionSender {
    pub(crate) fn send(&self, pending: PendingDestruction) {
        if let Err(err) = self.0.send(pending) {
            let lost = err.into_inner();
            log::warn!(
                "deletion queue disconnected; dropping teardown of {} {}",
                lost.kind,
                lost.id
            );
        }
    }
}

#[derive(Debug)]
pub struct DeletionQueue {
    sender: Sender<PendingDestruction>,
    receiver: Receiver<PendingDestruction>,
    // Requests received but not yet ready.
    backlog: Mutex<Vec<PendingDestruction>>,
}

impl DeletionQueue {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            sender,
            receiver,
            backlog: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn sender(&self) -> DeletionSender {
        DeletionSender(self.sender.clone())
    }

    /// Take every request whose `after_submission <= completed`; the rest
    /// stay queued for a later call.
    pub fn collect_ready(&self, completed: u64) -> Vec<PendingDestruction> {
        let mut backlog = self.backlog.lock();
        backlog.extend(self.receiver.try_iter());
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut *backlog)
            .into_iter()
            .partition(|p| p.after_submission <= completed);
        *backlog = waiting;
        ready
    }

    /// Number of requests not yet collected.
    pub fn pending(&self) -> usize {
        let mut backlog = self.backlog.lock();
        backlog.extend(self.receiver.try_iter());
        backlog.len()
    }

    /// Number of uncollected requests for `id`. Anything above one means a
    /// resource was torn down twice.
    pub fn pending_for(&self, id: ResourceId) -> usize {
        let mut backlog = self.backlog.lock();
        backlog.extend(self.receiver.try_iter());
        backlog.iter().filter(|p| p.id == id).count()
    }

    /// A second receiving end that outlives the queue.
    #[cfg(test)]
    pub(crate) fn observer(&self) -> Receiver<PendingDestruction> {
        self.receiver.clone()
    }
}

impl Default for DeletionQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(id: u64, after: u64) -> PendingDestruction {
        PendingDestruction {
            kind: ResourceKind::Texture,
            id: ResourceId(id),
            label: None,
            after_submission: after,
        }
    }

    /// Invariant: only requests whose submission completed are collected;
    /// the rest are kept, in order, for later.
    #[test]
    fn collect_respects_submission_index() {
        let q = DeletionQueue::new();
        let tx = q.sender();
        tx.send(pending(1, 0));
        tx.send(pending(2, 3));
        tx.send(pending(3, 1));

        let ready: Vec<u64> = q.collect_ready(1).iter().map(|p| p.id.get()).collect();
        assert_eq!(ready, vec![1, 3]);
        assert_eq!(q.pending(), 1);
        assert!(q.collect_ready(2).is_empty());
        let ready: Vec<u64> = q.collect_ready(3).iter().map(|p| p.id.get()).collect();
        assert_eq!(ready, vec![2]);
        assert_eq!(q.pending(), 0);
    }

    #[test]
    fn pending_for_counts_by_id() {
        let q = DeletionQueue::new();
        let tx = q.sender();
        tx.send(pending(7, 0));
        tx.send(pending(8, 0));
        assert_eq!(q.pending_for(ResourceId(7)), 1);
        assert_eq!(q.pending_for(ResourceId(9)), 0);
        // Counting does not consume.
        assert_eq!(q.pending(), 2);
    }

    /// Invariant: sending after the queue is gone is logged, not a panic.
    #[test]
    fn send_after_queue_dropped_is_harmless() {
        let q = DeletionQueue::new();
        let tx = q.sender();
        drop(q);
        tx.send(pending(1, 0));
    }
}
