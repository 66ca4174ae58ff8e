use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use std::sync::atomic::{AtomicBool, AtomicPtr};

use crossbeam_utils::CachePadded;
use log::trace;

use crate::environment::{Environment, Park};

type NodePtr<W> = NonNull<CachePadded<Node<W>>>;

// `waiting` is set by the owner before linking and cleared once by the
// predecessor. `successor` is written once, by the successor.
struct Node<W> {
    waiting: AtomicBool,
    successor: AtomicPtr<CachePadded<Node<W>>>,
    waiter: W,
}

impl<W> Node<W> {
    fn alloc(waiter: W) -> NodePtr<W> {
        let node = Box::new(CachePadded::new(Node {
            waiting: AtomicBool::new(false),
            successor: AtomicPtr::new(ptr::null_mut()),
            waiter,
        }));
        NonNull::from(Box::leak(node))
    }

    /// # Safety
    ///
    /// `node` must come from [`Node::alloc`] and no other task may still reach it.
    unsafe fn retire(node: NodePtr<W>) {
        drop(Box::from_raw(node.as_ptr()));
    }
}

/// A Mellor-Crummey and Scott queue lock without attached data. Releasing a
/// [`Handle`] on a lock that did not issue it panics.
pub struct RawMcsLock<E: Environment = Park> {
    tail: CachePadded<AtomicPtr<CachePadded<Node<E::Waiter>>>>,
    env: E,
}

unsafe impl<E: Environment + Send> Send for RawMcsLock<E> {}

unsafe impl<E: Environment + Sync> Sync for RawMcsLock<E> where E::Waiter: Send + Sync {}

impl RawMcsLock<Park> {
    pub const fn new() -> Self {
        RawMcsLock::with_environment(Park)
    }
}

impl<E: Environment> RawMcsLock<E> {
    pub const fn with_environment(env: E) -> Self {
        RawMcsLock {
            tail: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            env,
        }
    }

    /// Not reentrant: acquiring again before releasing the handle deadlocks.
    pub fn acquire(&self) -> Handle<'_, E> {
        let node = Node::alloc(self.env.waiter());
        let predecessor = self.tail.swap(node.as_ptr(), AcqRel);
        let Some(predecessor) = NonNull::new(predecessor) else {
            return Handle { lock: self, node };
        };

        // SAFETY: `node` is not reachable by anyone else until the link below
        // is published. The predecessor cannot retire before it has read that
        // link, because `tail` no longer points at it.
        unsafe {
            node.as_ref().waiting.store(true, Relaxed);
            predecessor.as_ref().successor.store(node.as_ptr(), Release);
        }
        trace!("mcs lock {:p}: queued behind a holder", self);

        // SAFETY: `node` is retired only by the `release` of our own handle.
        let this = unsafe { node.as_ref() };
        while this.waiting.load(Acquire) {
            self.env.suspend();
        }
        Handle { lock: self, node }
    }

    pub fn try_acquire(&self) -> Option<Handle<'_, E>> {
        if !self.tail.load(Relaxed).is_null() {
            return None;
        }
        let node = Node::alloc(self.env.waiter());
        match self
            .tail
            .compare_exchange(ptr::null_mut(), node.as_ptr(), AcqRel, Relaxed)
        {
            Ok(_) => Some(Handle { lock: self, node }),
            Err(_) => {
                // SAFETY: the node was never published.
                unsafe { Node::retire(node) };
                None
            }
        }
    }

    pub fn release(&self, handle: Handle<'_, E>) {
        assert!(
            ptr::eq(handle.lock, self),
            "mcs lock handle released on a lock that did not issue it"
        );
        let node = handle.node;
        // SAFETY: the handle owns its node until this call retires it.
        let this = unsafe { node.as_ref() };

        let mut successor = this.successor.load(Acquire);
        if successor.is_null() {
            if self
                .tail
                .compare_exchange(node.as_ptr(), ptr::null_mut(), AcqRel, Relaxed)
                .is_ok()
            {
                // SAFETY: `tail` no longer points at the node and nobody linked in.
                unsafe { Node::retire(node) };
                return;
            }
            // A successor swapped itself into `tail` but has not linked yet.
            while successor.is_null() {
                std::hint::spin_loop();
                successor = this.successor.load(Acquire);
            }
        }

        // SAFETY: the successor is suspended on `waiting` and cannot retire its
        // node before it observes the store below. Not touched after the store.
        let successor = unsafe { &*successor };
        let waiter = successor.waiter.clone();
        successor.waiting.store(false, Release);
        trace!("mcs lock {:p}: handed off to the next waiter", self);
        self.env.wake(&waiter);

        // SAFETY: the successor has read its link, so the node is unreachable.
        unsafe { Node::retire(node) };
    }

    pub fn is_locked(&self) -> bool {
        !self.tail.load(Acquire).is_null()
    }

    pub fn environment(&self) -> &E {
        &self.env
    }
}

impl<E: Environment + Default> Default for RawMcsLock<E> {
    fn default() -> Self {
        RawMcsLock::with_environment(E::default())
    }
}

impl<E: Environment> fmt::Debug for RawMcsLock<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawMcsLock")
            .field("locked", &self.is_locked())
            .finish()
    }
}

#[must_use = "the lock stays held until the handle is released"]
pub struct Handle<'a, E: Environment = Park> {
    lock: &'a RawMcsLock<E>,
    node: NodePtr<E::Waiter>,
}

impl<E: Environment> fmt::Debug for Handle<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("lock", &(self.lock as *const RawMcsLock<E>))
            .field("node", &self.node)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::tests::Recording;
    use crate::environment::{Spin, Yield};
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};
    use std::thread;

    fn contend<E>(lock: Arc<RawMcsLock<E>>, thread_n: usize, n: usize)
    where
        E: Environment + Send + Sync + 'static,
        E::Waiter: Send + Sync,
    {
        let counter = Arc::new(AtomicUsize::new(0));
        let inside = Arc::new(AtomicBool::new(false));
        let threads: Vec<_> = (0..thread_n)
            .map(|_| {
                let lock = lock.clone();
                let counter = counter.clone();
                let inside = inside.clone();
                thread::spawn(move || {
                    for _ in 0..n {
                        let handle = lock.acquire();
                        assert!(!inside.swap(true, Relaxed));
                        // Split load and store lose updates unless access is exclusive.
                        let value = counter.load(Relaxed);
                        counter.store(value + 1, Relaxed);
                        inside.store(false, Relaxed);
                        lock.release(handle);
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(counter.load(Relaxed), n * thread_n);
        assert!(!lock.is_locked());
    }

    #[test]
    fn smoke() {
        let lock = RawMcsLock::new();
        assert!(!lock.is_locked());
        let handle = lock.acquire();
        assert!(lock.is_locked());
        lock.release(handle);
        assert!(!lock.is_locked());
        let handle = lock.acquire();
        lock.release(handle);
        assert!(!lock.is_locked());
    }

    #[test]
    fn try_acquire_fails_while_held() {
        let lock = RawMcsLock::new();
        let handle = lock.try_acquire().unwrap();
        assert!(lock.try_acquire().is_none());
        lock.release(handle);
        let handle = lock.try_acquire().unwrap();
        lock.release(handle);
        assert!(!lock.is_locked());
    }

    #[test]
    fn uncontended_never_suspends_or_wakes() {
        let lock = RawMcsLock::with_environment(Recording::default());
        for _ in 0..100 {
            let handle = lock.acquire();
            lock.release(handle);
        }
        assert_eq!(lock.environment().suspended(), 0);
        assert_eq!(lock.environment().wakes.load(Relaxed), 0);
    }

    #[test]
    #[should_panic(expected = "did not issue it")]
    fn release_on_foreign_lock_panics() {
        let a = RawMcsLock::new();
        let b = RawMcsLock::new();
        let handle = a.acquire();
        b.release(handle);
    }

    #[test]
    fn grants_in_enqueue_order() {
        let lock = Arc::new(RawMcsLock::with_environment(Recording::default()));
        let order = Arc::new(Mutex::new(Vec::new()));

        let held = lock.acquire();
        let threads: Vec<_> = (1..=3)
            .map(|id| {
                let t = {
                    let lock = lock.clone();
                    let order = order.clone();
                    thread::spawn(move || {
                        let handle = lock.acquire();
                        order.lock().unwrap().push(id);
                        lock.release(handle);
                    })
                };
                // Each task is queued before the next one starts.
                lock.environment().wait_for_suspended(id);
                t
            })
            .collect();
        lock.release(held);

        // Each hand-off wakes exactly the next queued thread.
        let queued: Vec<_> = threads.iter().map(|t| t.thread().id()).collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(lock.environment().woken(), queued);
        assert_eq!(lock.environment().wakes.load(Relaxed), 3);
        assert!(!lock.is_locked());
    }

    #[test]
    fn every_queued_waiter_is_woken() {
        let lock = Arc::new(RawMcsLock::with_environment(Recording::default()));
        let held = lock.acquire();
        let threads: Vec<_> = (0..16)
            .map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    let handle = lock.acquire();
                    lock.release(handle);
                })
            })
            .collect();
        lock.environment().wait_for_suspended(16);
        lock.release(held);

        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(lock.environment().wakes.load(Relaxed), 16);
        assert!(!lock.is_locked());
    }

    #[test]
    fn happy_path() {
        contend(Arc::new(RawMcsLock::new()), 8, 1000);
    }

    // Polling waiters need a core each.
    fn polling_threads() -> usize {
        thread::available_parallelism().map_or(1, |n| n.get()).min(8)
    }

    #[test]
    fn happy_path_spin() {
        contend(Arc::new(RawMcsLock::with_environment(Spin)), polling_threads(), 1000);
    }

    #[test]
    fn happy_path_yield() {
        contend(Arc::new(RawMcsLock::with_environment(Yield)), polling_threads(), 1000);
    }
}
