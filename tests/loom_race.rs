//! Model-checks the two sequentially-consistent fences that make `pop` and
//! `steal` safe against each other.
//!
//! `crossbeam_epoch`'s global collector spawns real threads and is not
//! loom-aware, so the production `Inner<T>` can't be driven through loom
//! directly. What actually needs exhaustive interleaving coverage is the
//! `top`/`bottom`/fence protocol itself -- the part of the algorithm spec.md
//! calls out as "load-bearing" -- so this reproduces exactly that protocol
//! on a tiny fixed-size buffer with loom's atomics, independent of the
//! epoch-reclamation plumbing. A bug here (e.g. weakening a fence to
//! Acquire/Release) should make loom find an interleaving where both the
//! "owner" and the "stealer" claim the same slot.
#![cfg(loom)]

use loom::sync::atomic::{AtomicIsize, Ordering::*};
use loom::sync::Arc;
use loom::thread;

struct Racy {
    top: AtomicIsize,
    bottom: AtomicIsize,
    // A single slot is enough to model the contested-last-element race.
    slot_owner: AtomicIsize,
}

const EMPTY: isize = -1;

impl Racy {
    fn new() -> Self {
        Racy {
            top: AtomicIsize::new(0),
            bottom: AtomicIsize::new(1),
            slot_owner: AtomicIsize::new(EMPTY),
        }
    }

    /// Mirrors `Inner::pop`'s case split for the single-element case.
    fn pop(&self) -> bool {
        let b = self.bottom.load(Relaxed) - 1;
        self.bottom.store(b, Relaxed);

        loom::sync::atomic::fence(SeqCst);

        let t = self.top.load(Relaxed);

        if t <= b {
            if t == b {
                let won = self
                    .top
                    .compare_exchange(t, t + 1, SeqCst, Relaxed)
                    .is_ok();
                self.bottom.store(t + 1, Relaxed);
                if won {
                    self.claim();
                    return true;
                }
                false
            } else {
                self.claim();
                true
            }
        } else {
            self.bottom.store(t, Relaxed);
            false
        }
    }

    /// Mirrors `Inner::steal`'s single-index path.
    fn steal(&self) -> bool {
        let t = self.top.load(Acquire);
        loom::sync::atomic::fence(SeqCst);
        let b = self.bottom.load(Acquire);

        if t >= b {
            return false;
        }

        if self
            .top
            .compare_exchange(t, t + 1, Release, Relaxed)
            .is_ok()
        {
            self.claim();
            true
        } else {
            false
        }
    }

    /// Records that the calling "thread" believes it owns index 0. Panics if
    /// someone already claimed it -- this is the property under test.
    fn claim(&self) {
        let prev = self.slot_owner.swap(0, SeqCst);
        assert_eq!(prev, EMPTY, "index claimed twice -- duplication bug");
    }
}

#[test]
fn pop_and_steal_never_agree_on_the_last_element() {
    loom::model(|| {
        let r = Arc::new(Racy::new());

        let r2 = r.clone();
        let stealer = thread::spawn(move || {
            r2.steal();
        });

        r.pop();

        stealer.join().unwrap();
    });
}
