//! A concurrent work-stealing double-ended queue of the Chase-Lev family.
//!
//! One *owner* thread [`push`](Worker::push)es and [`pop`](Worker::pop)s
//! from one end of the queue ("bottom"); any number of foreign threads
//! [`steal`](Stealer::steal) from the other end ("top"). All operations are
//! lock-free, and the owner's fast path is wait-free.
//!
//! ```
//! use chase_lev_deque::{Steal, Worker};
//!
//! let w = Worker::new();
//! w.push(1);
//! w.push(2);
//! w.push(3);
//!
//! assert_eq!(w.pop(), Some(3));
//!
//! let s = w.stealer();
//! assert_eq!(s.steal(), Steal::Data(1));
//! ```
//!
//! # Design
//!
//! The queue is backed by a growable circular buffer rather than a linked
//! list, which is what makes the owner's `push`/`pop` wait-free: neither
//! touches the allocator except on the (rare, amortized) grow/shrink path.
//! The buffer is swapped out from under in-flight stealers using
//! [`crossbeam_epoch`] so that a buffer being read by a stealer is never
//! freed out from under it. See the [`Worker`] and [`Stealer`] docs for the
//! exact API, and the module-level comments in `deque` for the memory-order
//! argument behind `push`/`pop`/`steal`.
//!
//! The owner side is split into its own, non-`Sync` handle type so that the
//! single-writer discipline on `bottom` is enforced by the type system
//! rather than by convention.
//!
//! # Non-goals
//!
//! This is a single-producer structure: only the `Worker` that created a
//! deque (or one it was moved to) may `push`/`pop`. It has no built-in
//! capacity bound (the buffer grows on demand) and no fairness or ordering
//! guarantee across concurrent stealers beyond each one observing a
//! distinct index. Batched stealing ([`Stealer::steal_batch`],
//! [`Stealer::steal_batch_and_pop`]) and victim selection, parking, and
//! backoff policy are left to the caller; this crate only provides the
//! primitives and reports contention via [`Steal::Retry`] rather than
//! retrying internally.

#![warn(missing_docs, rust_2018_idioms)]

mod buffer;
mod deque;

pub use crate::deque::{Steal, Stealer, Worker};

impl<T: PartialEq> PartialEq for Steal<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Steal::Empty, Steal::Empty) | (Steal::Retry, Steal::Retry) => true,
            (Steal::Data(a), Steal::Data(b)) => a == b,
            _ => false,
        }
    }
}
