//! Fair, reentrant readers-writer lock.
//!
//! Waiters are served in arrival order: a reader queued behind a writer waits
//! for that writer, and a writer waits for the readers that arrived before it.
//! Both modes are reentrant per thread, and the exclusive holder may also take
//! the shared mode. Taking the exclusive mode while holding only the shared one
//! is refused instead of deadlocking.

use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::error::{InstrumentError, Result};

#[derive(Debug, Default)]
struct LockState {
    writer: Option<(ThreadId, usize)>,
    readers: HashMap<ThreadId, usize>,
    queue: VecDeque<Ticket>,
    next_ticket: u64,
}

#[derive(Debug, Clone, Copy)]
struct Ticket {
    id: u64,
    exclusive: bool,
}

impl LockState {
    fn enqueue(&mut self, exclusive: bool) -> u64 {
        let id = self.next_ticket;
        self.next_ticket += 1;
        self.queue.push_back(Ticket { id, exclusive });
        id
    }

    fn dequeue(&mut self, id: u64) {
        self.queue.retain(|t| t.id != id);
    }

    fn writer_queued_before(&self, id: u64) -> bool {
        self.queue.iter().take_while(|t| t.id != id).any(|t| t.exclusive)
    }

    fn is_front(&self, id: u64) -> bool {
        self.queue.front().map(|t| t.id == id).unwrap_or(false)
    }
}

#[derive(Debug, Default)]
pub struct FairReentrantRwLock {
    state: Mutex<LockState>,
    changed: Condvar,
}

impl FairReentrantRwLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_shared(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        let reentrant = matches!(state.writer, Some((owner, _)) if owner == me) || state.readers.contains_key(&me);
        if !reentrant {
            let ticket = state.enqueue(false);
            while state.writer.is_some() || state.writer_queued_before(ticket) {
                self.changed.wait(&mut state);
            }
            state.dequeue(ticket);
            // Readers queued right behind us may go too.
            self.changed.notify_all();
        }
        *state.readers.entry(me).or_insert(0) += 1;
    }

    pub fn unlock_shared(&self) -> Result<()> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        match state.readers.get(&me).copied().unwrap_or(0) {
            0 => Err(InstrumentError::illegal_state(
                "The current thread doesn't hold the lock in shared mode",
            )),
            1 => {
                state.readers.remove(&me);
                self.changed.notify_all();
                Ok(())
            }
            n => {
                state.readers.insert(me, n - 1);
                Ok(())
            }
        }
    }

    pub fn lock_exclusive(&self) -> Result<()> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if let Some((owner, count)) = state.writer.as_mut() {
            if *owner == me {
                *count += 1;
                return Ok(());
            }
        }
        if state.readers.contains_key(&me) {
            return Err(InstrumentError::illegal_state(
                "The current thread holds the lock in shared mode and can't upgrade it",
            ));
        }
        let ticket = state.enqueue(true);
        while state.writer.is_some() || !state.readers.is_empty() || !state.is_front(ticket) {
            self.changed.wait(&mut state);
        }
        state.dequeue(ticket);
        state.writer = Some((me, 1));
        Ok(())
    }

    pub fn unlock_exclusive(&self) -> Result<()> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        match state.writer.as_mut() {
            Some((owner, count)) if *owner == me => {
                *count -= 1;
                if *count == 0 {
                    state.writer = None;
                    self.changed.notify_all();
                }
                Ok(())
            }
            _ => Err(InstrumentError::illegal_state(
                "The current thread doesn't hold the lock in exclusive mode",
            )),
        }
    }

    pub fn read(&self) -> ReadGuard<'_> {
        self.lock_shared();
        ReadGuard { lock: self, _not_send: PhantomData }
    }

    pub fn write(&self) -> Result<WriteGuard<'_>> {
        self.lock_exclusive()?;
        Ok(WriteGuard { lock: self, _not_send: PhantomData })
    }

    pub fn is_held_exclusively(&self) -> bool {
        let me = thread::current().id();
        matches!(self.state.lock().writer, Some((owner, _)) if owner == me)
    }

    /// Exclusive hold count of the current thread.
    pub fn exclusive_holds(&self) -> usize {
        let me = thread::current().id();
        match self.state.lock().writer {
            Some((owner, count)) if owner == me => count,
            _ => 0,
        }
    }
}

#[must_use = "the lock is released when the guard is dropped"]
pub struct ReadGuard<'a> {
    lock: &'a FairReentrantRwLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        let _ = self.lock.unlock_shared();
    }
}

#[must_use = "the lock is released when the guard is dropped"]
pub struct WriteGuard<'a> {
    lock: &'a FairReentrantRwLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let _ = self.lock.unlock_exclusive();
    }
}
