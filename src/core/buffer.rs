//! Bounded single-producer / single-consumer frame buffer.
//!
//! The buffer decouples the decoder thread from consumers that run on a
//! fixed deadline (a render tick, an audio callback) and therefore must never
//! wait. All backpressure is absorbed by the producer: [`Producer::add`] is
//! the only call that can block.
//!
//! Internally there are two FIFOs. The producer appends to a shared queue
//! under a mutex; the consumer reads from a private queue it owns without any
//! locking, and only when that private queue runs dry does it take the lock
//! once and swap the two queues. A consumer that is keeping up therefore pays
//! one lock per batch instead of one per item.
//!
//! Besides the capacity bound, the buffer carries a quota: the total number
//! of items allowed to pass through it. Once the quota is reached and both
//! queues are drained, the buffer is done for good. Lowering the quota to
//! zero with [`BufferControl::set_total`] is how the producer announces end
//! of stream.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use log::trace;

/// Outcome of a non-blocking consumer read.
#[derive(Debug, PartialEq, Eq)]
pub enum Fetch<T> {
    /// The front item, left in place until [`Consumer::pop`].
    Ready(T),
    /// Nothing buffered right now, more may arrive later.
    NotReady,
    /// Nothing buffered and nothing will ever arrive again.
    Done,
}

impl<T> Fetch<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Fetch::Done)
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Fetch::Ready(item) => Some(item),
            _ => None,
        }
    }
}

struct State<T> {
    producer_side: VecDeque<T>,
    seen: usize,
    allowed: usize,
}

impl<T> State<T> {
    fn quota_reached(&self) -> bool {
        self.seen >= self.allowed
    }
}

struct Shared<T> {
    state: Mutex<State<T>>,
    space_available: Condvar,
    stopped: AtomicBool,
    max_size: usize,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // A panicking producer must not take the consumer down with it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Creates a buffer holding at most `max_size` items on the producer side.
///
/// The quota starts at zero, so nothing can be added before
/// [`BufferControl::set_total`] is called.
pub fn bounded<T>(max_size: usize) -> (Producer<T>, Consumer<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            producer_side: VecDeque::with_capacity(max_size),
            seen: 0,
            allowed: 0,
        }),
        space_available: Condvar::new(),
        stopped: AtomicBool::new(false),
        max_size: max_size.max(1),
    });
    (
        Producer {
            shared: shared.clone(),
        },
        Consumer {
            shared,
            consumer_side: VecDeque::with_capacity(max_size),
        },
    )
}

/// Cross-thread control handle: quota updates and stop.
///
/// Unlike [`Producer`] and [`Consumer`] this handle can be cloned and used
/// from any thread.
pub struct BufferControl<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BufferControl<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> BufferControl<T> {
    /// Sets how many items may pass through the buffer in total.
    ///
    /// A value at or below the number already added closes the buffer to
    /// the producer; consumers see [`Fetch::Done`] once the remaining items
    /// are drained.
    pub fn set_total(&self, total: usize) {
        let mut state = self.shared.lock();
        trace!("buffer quota set to {total} ({} seen)", state.seen);
        state.allowed = total;
        drop(state);
        self.shared.space_available.notify_all();
    }

    /// Terminates the buffer: a producer blocked in [`Producer::add`] returns
    /// `false`, later adds are refused and consumers report [`Fetch::Done`].
    pub fn stop(&self) {
        // Taken so a producer between its predicate check and its wait cannot
        // miss the notification.
        let _state = self.shared.lock();
        self.shared.stopped.store(true, Ordering::Release);
        self.shared.space_available.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }
}

/// Producer half. Not cloneable: there is exactly one producer.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Producer<T> {
    /// Appends `item`, blocking while the producer side is full.
    ///
    /// Returns `false`, without enqueuing, once the quota is reached or the
    /// buffer was stopped. Both conditions are permanent unless the quota is
    /// raised again.
    pub fn add(&self, item: T) -> bool {
        let mut state = self.shared.lock();
        loop {
            if self.shared.is_stopped() || state.quota_reached() {
                return false;
            }
            if state.producer_side.len() < self.shared.max_size {
                state.producer_side.push_back(item);
                state.seen += 1;
                return true;
            }
            state = self
                .shared
                .space_available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn control(&self) -> BufferControl<T> {
        BufferControl {
            shared: self.shared.clone(),
        }
    }

    pub fn set_total(&self, total: usize) {
        self.control().set_total(total)
    }

    pub fn stop(&self) {
        self.control().stop()
    }
}

/// Consumer half. Not cloneable: there is exactly one consumer.
///
/// None of its methods ever wait on the producer.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
    consumer_side: VecDeque<T>,
}

impl<T> Consumer<T> {
    /// Peeks at the front item.
    ///
    /// Calling `get` again without [`pop`](Self::pop) returns the same item.
    pub fn get(&mut self) -> Fetch<&T> {
        if self.shared.is_stopped() {
            return Fetch::Done;
        }
        let exhausted = if self.consumer_side.is_empty() {
            self.swap_queues()
        } else {
            false
        };
        match self.consumer_side.front() {
            Some(item) => Fetch::Ready(item),
            None if exhausted => Fetch::Done,
            None => Fetch::NotReady,
        }
    }

    /// Removes and returns the front item, the one the last
    /// [`get`](Self::get) returned.
    pub fn pop(&mut self) -> Option<T> {
        if self.shared.is_stopped() {
            return None;
        }
        if self.consumer_side.is_empty() {
            self.swap_queues();
        }
        self.consumer_side.pop_front()
    }

    /// `true` once the quota is reached and both sides are empty, or the
    /// buffer was stopped.
    pub fn is_all_done(&self) -> bool {
        if self.shared.is_stopped() {
            return true;
        }
        if !self.consumer_side.is_empty() {
            return false;
        }
        let state = self.shared.lock();
        state.quota_reached() && state.producer_side.is_empty()
    }

    pub fn control(&self) -> BufferControl<T> {
        BufferControl {
            shared: self.shared.clone(),
        }
    }

    pub fn set_total(&self, total: usize) {
        self.control().set_total(total)
    }

    pub fn stop(&self) {
        self.control().stop()
    }

    /// Moves everything the producer has queued to the consumer side.
    /// Only called with an empty consumer side. Returns whether the buffer
    /// is exhausted for good.
    fn swap_queues(&mut self) -> bool {
        let mut state = self.shared.lock();
        std::mem::swap(&mut self.consumer_side, &mut state.producer_side);
        let exhausted = self.consumer_side.is_empty() && state.quota_reached();
        let moved = self.consumer_side.len();
        drop(state);
        if moved > 0 {
            trace!("buffer swap moved {moved} items to the consumer");
            self.shared.space_available.notify_all();
        }
        exhausted
    }
}
