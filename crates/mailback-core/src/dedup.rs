use std::collections::HashSet;

/// Threads already answered during the current cycle.
///
/// Owned by a single `run_cycle` call and dropped when it returns. Durable
/// dedup across cycles lives in the mailbox's `replied` label, not here.
#[derive(Debug, Default)]
pub struct DedupGate {
    threads: HashSet<String>,
}

impl DedupGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self, thread_id: &str) -> bool {
        self.threads.contains(thread_id)
    }

    pub fn mark(&mut self, thread_id: &str) {
        self.threads.insert(thread_id.to_string());
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}
