use std::thread::{self, Thread};

/// How a queued task waits and how its predecessor wakes it. `suspend` may
/// return spuriously; a `wake` that comes before `suspend` must not be lost.
pub trait Environment {
    type Waiter: Clone;

    fn waiter(&self) -> Self::Waiter;

    fn suspend(&self);

    fn wake(&self, waiter: &Self::Waiter);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Park;

impl Environment for Park {
    type Waiter = Thread;

    fn waiter(&self) -> Thread {
        thread::current()
    }

    fn suspend(&self) {
        thread::park();
    }

    fn wake(&self, waiter: &Thread) {
        waiter.unpark();
    }
}

/// the classic MCS spin. Each waiter burns its core until granted, so it
/// needs a core per waiter; oversubscribed, every hand-off waits for the
/// scheduler to run that one successor.
#[derive(Debug, Default, Clone, Copy)]
pub struct Spin;

impl Environment for Spin {
    type Waiter = ();

    fn waiter(&self) {}

    fn suspend(&self) {
        std::hint::spin_loop();
    }

    fn wake(&self, _: &()) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Yield;

impl Environment for Yield {
    type Waiter = ();

    fn waiter(&self) {}

    fn suspend(&self) {
        thread::yield_now();
    }

    fn wake(&self, _: &()) {}
}
