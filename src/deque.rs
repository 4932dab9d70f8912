use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::sync::atomic::{self, AtomicIsize};
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release, SeqCst};
use std::sync::Arc;

use crossbeam_epoch::{self as epoch, Atomic, Owned};
use crossbeam_utils::CachePadded;

use crate::buffer::Buffer;

/// Minimum buffer capacity for a deque. Rounded-up minimums below this are
/// clamped up to it.
const DEFAULT_MIN_CAP: usize = 16;

/// If a buffer of at least this size is retired, the thread-local garbage
/// queue is flushed so it gets deallocated as soon as possible rather than
/// riding along with smaller, more frequent retirements.
const FLUSH_THRESHOLD_BYTES: usize = 1 << 10;

/// The result of a `steal` attempt.
pub enum Steal<T> {
    /// The deque was empty at the time of the attempt.
    Empty,

    /// An element was stolen.
    Data(T),

    /// Lost a race with another operation touching `top`. The caller should
    /// decide whether to retry this deque or try a different victim.
    Retry,
}

impl<T> Steal<T> {
    /// Returns `true` if the deque was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, Steal::Empty)
    }

    /// Returns `true` if this attempt lost a race and should be retried.
    pub fn is_retry(&self) -> bool {
        matches!(self, Steal::Retry)
    }

    /// Returns `true` if an element was stolen.
    pub fn is_success(&self) -> bool {
        matches!(self, Steal::Data(_))
    }

    /// Converts into an `Option`, discarding the distinction between `Empty`
    /// and `Retry`.
    pub fn success(self) -> Option<T> {
        match self {
            Steal::Data(v) => Some(v),
            Steal::Empty | Steal::Retry => None,
        }
    }
}

impl<T> fmt::Debug for Steal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Steal::Empty => f.pad("Empty"),
            Steal::Data(_) => f.pad("Data(..)"),
            Steal::Retry => f.pad("Retry"),
        }
    }
}

/// Internal state shared between a `Worker` and any number of `Stealer`s.
struct Inner<T> {
    /// The next index to steal.
    top: AtomicIsize,

    /// One past the last index the owner has pushed.
    bottom: AtomicIsize,

    /// The current backing buffer. Replaced wholesale on grow/shrink; the
    /// old buffer is retired through the epoch collector rather than freed
    /// directly, since stealers may still be dereferencing it.
    buffer: Atomic<Buffer<T>>,

    /// Capacity never shrinks below this. Always a power of two.
    min_cap: usize,
}

impl<T> Inner<T> {
    fn new(min_cap: usize) -> Self {
        let power = min_cap.next_power_of_two().max(DEFAULT_MIN_CAP);
        Inner {
            top: AtomicIsize::new(0),
            bottom: AtomicIsize::new(0),
            buffer: Atomic::new(Buffer::alloc(power)),
            min_cap: power,
        }
    }

    /// Replaces the buffer with a freshly allocated one of `new_cap`,
    /// copying over the live range. Called only by the owner, either to grow
    /// (buffer full) or shrink (buffer mostly empty).
    #[cold]
    unsafe fn resize(&self, new_cap: usize) {
        let b = self.bottom.load(Relaxed);
        let t = self.top.load(Relaxed);

        // No pin needed: the owner is the only thread that ever reads this
        // buffer through this path, and it will not race itself.
        let buf = self.buffer.load(Relaxed, epoch::unprotected());
        let new = buf.deref().copy_to(new_cap, t, b);

        let guard = &epoch::pin();
        let old = self
            .buffer
            .swap(Owned::new(new).into_shared(guard), Release, guard);
        guard.defer_unchecked(move || drop(old.into_owned()));

        if mem::size_of::<T>() * new_cap >= FLUSH_THRESHOLD_BYTES {
            guard.flush();
        }
    }

    /// Shrinks the buffer if the live range has dropped to a quarter of
    /// capacity and halving would not take it below `min_cap`.
    unsafe fn maybe_shrink(&self, b: isize, t: isize) {
        let buf = self.buffer.load(Relaxed, epoch::unprotected());
        let cap = buf.deref().cap();
        let len = b.wrapping_sub(t);
        if len <= (cap / 4) as isize && cap / 2 >= self.min_cap {
            self.resize(cap / 2);
        }
    }

    unsafe fn push(&self, value: T) {
        let b = self.bottom.load(Relaxed);
        let t = self.top.load(Acquire);

        let mut buf = self.buffer.load(Relaxed, epoch::unprotected());
        let cap = buf.deref().cap() as isize;

        if b.wrapping_sub(t) >= cap {
            self.resize(2 * cap as usize);
            buf = self.buffer.load(Relaxed, epoch::unprotected());
        }

        buf.deref().write(b, value);

        // This fence, together with the `Acquire` a stealer uses to load
        // `bottom`, makes the write above visible before the bump below is.
        atomic::fence(Release);
        self.bottom.store(b.wrapping_add(1), Relaxed);
    }

    unsafe fn pop(&self) -> Option<T> {
        let b = self.bottom.load(Relaxed).wrapping_sub(1);
        self.bottom.store(b, Relaxed);

        // Sequentially-consistent fence: this is the point that must be
        // globally ordered against the fence in `steal`. Weakening either
        // one admits both the owner and a stealer taking the same element.
        atomic::fence(SeqCst);

        let t = self.top.load(Relaxed);

        let value = if t < b {
            // More than one element remained; no stealer can reach `b`.
            Some(self.read_at(b))
        } else if t == b {
            // Exactly one element left: race a stealer for it.
            let won = self
                .top
                .compare_exchange(t, t + 1, SeqCst, Relaxed)
                .is_ok();
            self.bottom.store(t + 1, Relaxed);
            if won { Some(self.read_at(b)) } else { None }
        } else {
            // The deque was already empty.
            self.bottom.store(t, Relaxed);
            None
        };

        if value.is_some() {
            self.maybe_shrink(b, t);
        }

        value
    }

    unsafe fn read_at(&self, index: isize) -> T {
        let buf = self.buffer.load(Relaxed, epoch::unprotected());
        buf.deref().read(index)
    }

    fn steal(&self) -> Steal<T> {
        let t = self.top.load(Acquire);

        // Pairs with the fence in `pop`.
        atomic::fence(SeqCst);

        let b = self.bottom.load(Acquire);

        if t >= b {
            return Steal::Empty;
        }

        let guard = &epoch::pin();
        let value = unsafe {
            let buf = self.buffer.load(Acquire, guard);
            buf.deref().read(t)
        };

        match self.top.compare_exchange(t, t.wrapping_add(1), Release, Relaxed) {
            Ok(_) => Steal::Data(value),
            Err(_) => {
                // We never actually took ownership of this slot -- whoever
                // wins the race (another stealer, or the owner's `pop`) will
                // drop it. Forget our bitwise copy so it isn't dropped twice.
                mem::forget(value);
                Steal::Retry
            }
        }
    }

    fn len(&self) -> usize {
        let b = self.bottom.load(Acquire);
        let t = self.top.load(Acquire);
        if b > t { (b - t) as usize } else { 0 }
    }

    fn is_empty(&self) -> bool {
        let b = self.bottom.load(Acquire);
        let t = self.top.load(Acquire);
        b <= t
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        let b = self.bottom.load(Relaxed);
        let t = self.top.load(Relaxed);

        unsafe {
            let buf = self.buffer.load(Relaxed, epoch::unprotected());
            buf.deref().drop_range(t, b);
            drop(buf.into_owned());
        }
    }
}

/// The owner's end of a work-stealing deque.
///
/// A `Worker<T>` grants exclusive access to `push`, `pop`, and a local
/// `steal` that degrades to the same contested path a foreign `Stealer`
/// would take. It is not [`Sync`] -- it must live on (or be moved to, but
/// never shared between) a single thread. Any number of [`Stealer`] handles
/// may be derived from it with [`Worker::stealer`].
pub struct Worker<T> {
    inner: Arc<CachePadded<Inner<T>>>,
    _marker: PhantomData<*mut ()>, // !Sync
}

unsafe impl<T: Send> Send for Worker<T> {}

impl<T> Default for Worker<T> {
    fn default() -> Self {
        Worker::new()
    }
}

impl<T> Worker<T> {
    /// Creates a new, empty deque.
    pub fn new() -> Worker<T> {
        Worker::with_min_capacity(DEFAULT_MIN_CAP)
    }

    /// Creates a new, empty deque whose buffer never shrinks below
    /// `min_cap` (rounded up to the next power of two, clamped to a small
    /// floor).
    pub fn with_min_capacity(min_cap: usize) -> Worker<T> {
        Worker {
            inner: Arc::new(CachePadded::new(Inner::new(min_cap))),
            _marker: PhantomData,
        }
    }

    /// Pushes `value` onto the bottom of the deque. Wait-free.
    pub fn push(&self, value: T) {
        unsafe { self.inner.push(value) }
    }

    /// Pops the most recently pushed value, if any. LIFO order with respect
    /// to `push` when there is no contention; may race with stealers for the
    /// last element. Wait-free outside of that one-CAS contested case.
    pub fn pop(&self) -> Option<T> {
        unsafe { self.inner.pop() }
    }

    /// Attempts to steal from this deque's own top end, exactly as a foreign
    /// [`Stealer`] would. Useful for schedulers that let an idle worker help
    /// itself to old work before checking other victims.
    pub fn steal(&self) -> Steal<T> {
        self.inner.steal()
    }

    /// Creates a new `Stealer` handle for this deque.
    pub fn stealer(&self) -> Stealer<T> {
        Stealer {
            inner: self.inner.clone(),
        }
    }

    /// Returns the number of elements currently in the deque. Exact with
    /// respect to the owner; a snapshot with respect to stealers.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the deque is (advisedly, possibly already stale)
    /// empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<T> fmt::Debug for Worker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker").field("len", &self.len()).finish()
    }
}

/// A stealer's end of a work-stealing deque.
///
/// Cloneable and freely shareable across threads (`Send + Sync` whenever `T`
/// is `Send`). Grants only `steal` and the read-only `len`/`is_empty`.
pub struct Stealer<T> {
    inner: Arc<CachePadded<Inner<T>>>,
}

unsafe impl<T: Send> Send for Stealer<T> {}
unsafe impl<T: Send> Sync for Stealer<T> {}

impl<T> Clone for Stealer<T> {
    fn clone(&self) -> Self {
        Stealer {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Stealer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stealer")
            .field("len", &self.len())
            .finish()
    }
}

impl<T> Stealer<T> {
    /// Attempts to steal one element from the top of the deque.
    pub fn steal(&self) -> Steal<T> {
        self.inner.steal()
    }

    /// Returns a snapshot of the number of elements in the deque.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the deque was (advisedly) empty at the time of the
    /// check.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Steals roughly half of this deque's elements and pushes them onto
    /// `dest`'s bottom, without popping any of them back out.
    ///
    /// This is a compound operation built entirely out of [`steal`](Self::steal)
    /// and [`Worker::push`] -- it introduces no new atomic state. It is meant
    /// for a scheduler refilling a local queue from a busier victim.
    pub fn steal_batch(&self, dest: &Worker<T>) -> Steal<()> {
        if Arc::ptr_eq(&self.inner, &dest.inner) {
            return Steal::Empty;
        }

        let mut moved = 0usize;
        loop {
            match self.steal() {
                Steal::Empty => break,
                Steal::Retry => {
                    if moved == 0 {
                        return Steal::Retry;
                    }
                    break;
                }
                Steal::Data(value) => {
                    dest.push(value);
                    moved += 1;

                    // Stop once we've moved about half of what's left, so a
                    // single batch doesn't drain the victim outright.
                    let remaining = self.len();
                    if moved >= (moved + remaining).max(2) / 2 {
                        break;
                    }
                }
            }
        }

        if moved == 0 {
            Steal::Empty
        } else {
            Steal::Data(())
        }
    }

    /// Like [`steal_batch`](Self::steal_batch), but also pops one element off
    /// `dest` to hand directly back to the caller -- the usual "refill, then
    /// take one" shape a work-stealing scheduler wants.
    pub fn steal_batch_and_pop(&self, dest: &Worker<T>) -> Steal<T> {
        match self.steal_batch(dest) {
            Steal::Empty => self.steal(),
            Steal::Retry => Steal::Retry,
            Steal::Data(()) => match dest.pop() {
                Some(value) => Steal::Data(value),
                None => Steal::Empty,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Steal, Worker};

    #[test]
    fn smoke() {
        let w = Worker::<isize>::new();
        assert_eq!(w.len(), 0);
        w.push(1);
        assert_eq!(w.len(), 1);
        assert_eq!(w.pop(), Some(1));
        assert_eq!(w.pop(), None);
    }

    #[test]
    fn push_pop_is_lifo() {
        let w = Worker::new();
        w.push(1);
        w.push(2);
        w.push(3);
        assert_eq!(w.pop(), Some(3));
        assert_eq!(w.pop(), Some(2));
        assert_eq!(w.pop(), Some(1));
    }

    #[test]
    fn stealer_takes_from_the_opposite_end() {
        let w = Worker::new();
        w.push(1);
        w.push(2);
        let s = w.stealer();
        match s.steal() {
            Steal::Data(v) => assert_eq!(v, 1),
            other => panic!("expected Steal::Data(1), got a different result: {:?}", other),
        }
        assert_eq!(w.pop(), Some(2));
    }

    #[test]
    fn grows_past_the_default_minimum_capacity() {
        let w = Worker::with_min_capacity(1);
        for i in 0..1000 {
            w.push(i);
        }
        for i in (0..1000).rev() {
            assert_eq!(w.pop(), Some(i));
        }
        assert!(w.is_empty());
    }
}
