//! Fixed-capacity hand-off between two pipeline stages.
//!
//! Every buffer has its own lock; stages of different replicas never contend.
//! Waiting is done on a condition variable, so a blocked producer (buffer
//! full) or consumer (buffer empty, not completed) sleeps until the other
//! side changes the buffer, completes it or the run is aborted.

use std::fmt;
use std::mem;
use std::sync::{Condvar, Mutex, MutexGuard};

use bytes::Bytes;

use crate::error::{PipelineError, Result, Stage};

/// A word and how often it has been seen so far.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    pub word: Bytes,
    pub count: u64,
}

impl Token {
    pub fn new(word: Bytes) -> Self {
        Token { word, count: 1 }
    }

    pub fn with_count(word: Bytes, count: u64) -> Self {
        Token { word, count }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", String::from_utf8_lossy(&self.word), self.count)
    }
}

/// The contents of a completed buffer, owned by whoever took them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequencyTable {
    replica: usize,
    entries: Vec<Token>,
}

impl FrequencyTable {
    pub fn new(replica: usize, entries: Vec<Token>) -> Self {
        FrequencyTable { replica, entries }
    }

    pub fn replica(&self) -> usize {
        self.replica
    }

    pub fn entries(&self) -> &[Token] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Token> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, word: &[u8]) -> Option<u64> {
        self.entries
            .iter()
            .find(|t| &t.word[..] == word)
            .map(|t| t.count)
    }
}

struct State {
    entries: Vec<Token>,
    completed: bool,
    aborted: bool,
}

pub struct BoundedBuffer {
    replica: usize,
    stage: Stage,
    capacity: usize,
    state: Mutex<State>,
    changed: Condvar,
}

impl fmt::Debug for BoundedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedBuffer")
            .field("replica", &self.replica)
            .field("stage", &self.stage)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("completed", &self.is_completed())
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

impl BoundedBuffer {
    pub fn new(replica: usize, stage: Stage, capacity: usize) -> Self {
        BoundedBuffer {
            replica,
            stage,
            capacity,
            state: Mutex::new(State {
                entries: Vec::with_capacity(capacity.min(1 << 16)),
                completed: false,
                aborted: false,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn replica(&self) -> usize {
        self.replica
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn poisoned(&self) -> PipelineError {
        PipelineError::WorkerPanicked(format!("{} of replica {}", self.stage, self.replica))
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| self.poisoned())
    }

    /// Observers must not fail just because a worker died holding the lock.
    fn observe(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_writable(&self, state: &State) -> Result<()> {
        if state.aborted {
            return Err(PipelineError::Cancelled);
        }
        if state.completed {
            return Err(PipelineError::BufferCompleted {
                replica: self.replica,
                stage: self.stage,
            });
        }
        Ok(())
    }

    /// Appends `token`, sleeping while the buffer is full.
    /// Returns whether the call had to wait.
    pub fn push(&self, token: Token) -> Result<bool> {
        let mut state = self.lock()?;
        let mut waited = false;
        loop {
            self.check_writable(&state)?;
            if state.entries.len() < self.capacity {
                break;
            }
            waited = true;
            state = self.changed.wait(state).map_err(|_| self.poisoned())?;
        }
        state.entries.push(token);
        drop(state);
        self.changed.notify_all();
        Ok(waited)
    }

    /// Appends `token` without waiting and returns its position.
    /// A full buffer is an error: nobody drains it before the barrier.
    pub fn append(&self, token: Token) -> Result<usize> {
        let mut state = self.lock()?;
        self.check_writable(&state)?;
        if state.entries.len() >= self.capacity {
            return Err(PipelineError::CapacityExceeded {
                replica: self.replica,
                stage: self.stage,
                capacity: self.capacity,
            });
        }
        state.entries.push(token);
        Ok(state.entries.len() - 1)
    }

    /// Adds `count` to the entry at `position`, as returned by `append`.
    pub fn increment(&self, position: usize, count: u64) -> Result<()> {
        let mut state = self.lock()?;
        self.check_writable(&state)?;
        state.entries[position].count += count;
        Ok(())
    }

    /// Removes everything currently buffered, newest first.
    ///
    /// Sleeps while the buffer is empty and not completed. `None` means the
    /// producer completed and every token has been consumed.
    pub fn take_batch(&self) -> Result<Option<Vec<Token>>> {
        let mut state = self.lock()?;
        loop {
            if state.aborted {
                return Err(PipelineError::Cancelled);
            }
            if !state.entries.is_empty() {
                break;
            }
            if state.completed {
                return Ok(None);
            }
            state = self.changed.wait(state).map_err(|_| self.poisoned())?;
        }
        let batch: Vec<Token> = state.entries.drain(..).rev().collect();
        drop(state);
        self.changed.notify_all();
        Ok(Some(batch))
    }

    /// Marks the buffer as final. Completing twice is an error.
    pub fn complete(&self) -> Result<()> {
        let mut state = self.lock()?;
        if state.completed {
            return Err(PipelineError::BufferCompleted {
                replica: self.replica,
                stage: self.stage,
            });
        }
        state.completed = true;
        drop(state);
        self.changed.notify_all();
        Ok(())
    }

    /// Wakes every waiter with `Cancelled`; used when another worker failed.
    pub fn abort(&self) {
        self.observe().aborted = true;
        self.changed.notify_all();
    }

    pub fn is_completed(&self) -> bool {
        self.observe().completed
    }

    pub fn is_aborted(&self) -> bool {
        self.observe().aborted
    }

    pub fn len(&self) -> usize {
        self.observe().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Moves the entries of a completed buffer out into a table.
    pub fn into_table(&self) -> Result<FrequencyTable> {
        let mut state = self.lock()?;
        if !state.completed {
            return Err(PipelineError::IncompleteBuffer {
                replica: self.replica,
                stage: self.stage,
            });
        }
        Ok(FrequencyTable::new(self.replica, mem::take(&mut state.entries)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn token(word: &'static str) -> Token {
        Token::new(Bytes::from_static(word.as_bytes()))
    }

    #[test]
    fn batch_is_newest_first() {
        let buffer = BoundedBuffer::new(1, Stage::Tokens, 4);
        buffer.push(token("a")).unwrap();
        buffer.push(token("b")).unwrap();
        buffer.push(token("c")).unwrap();
        let batch = buffer.take_batch().unwrap().unwrap();
        assert_eq!(batch, vec![token("c"), token("b"), token("a")]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn completed_and_empty_ends_consumption() {
        let buffer = BoundedBuffer::new(1, Stage::Tokens, 2);
        buffer.push(token("a")).unwrap();
        buffer.complete().unwrap();
        assert_eq!(buffer.take_batch().unwrap().unwrap().len(), 1);
        assert_eq!(buffer.take_batch().unwrap(), None);
    }

    #[test]
    fn completion_happens_once() {
        let buffer = BoundedBuffer::new(3, Stage::Table, 2);
        buffer.complete().unwrap();
        match buffer.complete() {
            Err(PipelineError::BufferCompleted { replica: 3, stage: Stage::Table }) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert!(buffer.is_completed());
        assert!(buffer.push(token("late")).is_err());
        assert!(buffer.append(token("late")).is_err());
    }

    #[test]
    fn append_fails_fast_at_capacity() {
        let buffer = BoundedBuffer::new(2, Stage::Table, 1);
        assert_eq!(buffer.append(token("a")).unwrap(), 0);
        match buffer.append(token("b")) {
            Err(PipelineError::CapacityExceeded {
                replica: 2,
                stage: Stage::Table,
                capacity: 1,
            }) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn increment_updates_in_place() {
        let buffer = BoundedBuffer::new(1, Stage::Table, 4);
        let pos = buffer.append(token("a")).unwrap();
        buffer.increment(pos, 2).unwrap();
        buffer.complete().unwrap();
        let table = buffer.into_table().unwrap();
        assert_eq!(table.get(b"a"), Some(3));
        assert_eq!(table.replica(), 1);
    }

    #[test]
    fn table_requires_completion() {
        let buffer = BoundedBuffer::new(1, Stage::Table, 4);
        assert!(buffer.into_table().is_err());
    }

    #[test]
    fn full_buffer_blocks_producer_until_drained() {
        let buffer = Arc::new(BoundedBuffer::new(1, Stage::Tokens, 1));
        buffer.push(token("a")).unwrap();

        let producer = {
            let buffer = buffer.clone();
            thread::spawn(move || buffer.push(token("b")))
        };
        thread::sleep(Duration::from_millis(50));
        assert_eq!(buffer.len(), 1);

        assert_eq!(buffer.take_batch().unwrap().unwrap(), vec![token("a")]);
        producer.join().unwrap().unwrap();
        assert_eq!(buffer.take_batch().unwrap().unwrap(), vec![token("b")]);
    }

    #[test]
    fn never_exceeds_capacity_under_concurrency() {
        let buffer = Arc::new(BoundedBuffer::new(1, Stage::Tokens, 3));
        let producer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    buffer.push(token("w"))?;
                }
                buffer.complete()
            })
        };
        let mut seen = 0;
        while let Some(batch) = buffer.take_batch().unwrap() {
            assert!(batch.len() <= 3);
            seen += batch.len();
        }
        producer.join().unwrap().unwrap();
        assert_eq!(seen, 1000);
    }

    #[test]
    fn abort_wakes_waiting_consumer() {
        let buffer = Arc::new(BoundedBuffer::new(1, Stage::Tokens, 1));
        let consumer = {
            let buffer = buffer.clone();
            thread::spawn(move || buffer.take_batch())
        };
        thread::sleep(Duration::from_millis(20));
        buffer.abort();
        match consumer.join().unwrap() {
            Err(PipelineError::Cancelled) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert!(buffer.is_aborted());
    }
}
