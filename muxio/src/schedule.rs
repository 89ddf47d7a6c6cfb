//! The timer queue: one-shot tasks keyed by absolute due time.
//!
//! Tasks with the same due time fire in submission order. All comparisons
//! against "now" use the [`Clock`] snapshot, so every decision within one
//! loop turn sees the same time.

use crate::clock::Clock;
use crate::error::Result;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::mem;
use std::rc::Rc;
use tracing::trace;

/// A scheduled one-shot callback.
pub type Task = Box<dyn FnOnce() -> Result<()>>;

/// Identifies a pending task. Ids of tasks that already fired or were
/// cancelled stay valid to pass around; cancelling them is a cheap miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskId {
    due: i64,
    seq: u64,
}

struct Inner {
    // Keyed by (due time, insertion sequence): equal due times fire FIFO.
    queue: BTreeMap<(i64, u64), Task>,
    next_seq: u64,
}

/// Shared handle to the timer queue. Clones refer to the same state.
#[derive(Clone)]
pub struct Schedule {
    clock: Clock,
    inner: Rc<RefCell<Inner>>,
}

impl Schedule {
    pub fn new(clock: Clock) -> Schedule {
        Schedule {
            clock,
            inner: Rc::new(RefCell::new(Inner {
                queue: BTreeMap::new(),
                next_seq: 0,
            })),
        }
    }

    /// The current time, per the clock snapshot.
    pub fn now(&self) -> i64 {
        self.clock.now_secs()
    }

    /// Schedule `task` to run at the absolute time `due`.
    pub fn at(&self, due: i64, task: impl FnOnce() -> Result<()> + 'static) -> TaskId {
        let mut inner = self.inner.borrow_mut();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.queue.insert((due, seq), Box::new(task));
        trace!(due, seq, "task scheduled");
        TaskId { due, seq }
    }

    /// Schedule `task` to run `seconds` from now.
    pub fn after(&self, seconds: u32, task: impl FnOnce() -> Result<()> + 'static) -> TaskId {
        self.at(self.now() + i64::from(seconds), task)
    }

    /// Remove a pending task. Returns false if it already fired or was
    /// cancelled before.
    pub fn cancel(&self, id: TaskId) -> bool {
        let removed = self.inner.borrow_mut().queue.remove(&(id.due, id.seq)).is_some();
        if removed {
            trace!(due = id.due, seq = id.seq, "task cancelled");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().queue.is_empty()
    }

    /// Fire every task whose due time has been reached, in order. Returns 0
    /// when the queue is empty afterwards, otherwise the seconds until the
    /// earliest remaining task.
    ///
    /// Tasks run with no internal borrow held, so they may schedule or
    /// cancel freely; a task error propagates and leaves the rest queued.
    pub fn run(&self) -> Result<u32> {
        loop {
            let task = {
                let mut inner = self.inner.borrow_mut();
                let now = self.clock.now_secs();
                match inner.queue.first_key_value().map(|(key, _)| *key) {
                    None => return Ok(0),
                    Some((due, _)) if due > now => {
                        return Ok(u32::try_from(due - now).unwrap_or(u32::MAX));
                    }
                    Some(_) => inner.queue.pop_first(),
                }
            };
            if let Some(((due, seq), task)) = task {
                trace!(due, seq, "task fires");
                task()?;
            }
        }
    }

    fn same_queue(&self, other: &Schedule) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

/// A scoped timer: owns at most one pending [`TaskId`] and cancels it when
/// dropped, so a task can never outlive the object that armed it.
pub struct Timeout {
    schedule: Schedule,
    id: Option<TaskId>,
}

impl Timeout {
    /// An inactive timeout bound to `schedule`.
    pub fn new(schedule: &Schedule) -> Timeout {
        Timeout {
            schedule: schedule.clone(),
            id: None,
        }
    }

    /// A timeout armed at the absolute time `due`.
    pub fn with_at(schedule: &Schedule, due: i64, task: impl FnOnce() -> Result<()> + 'static) -> Timeout {
        let mut t = Timeout::new(schedule);
        t.at(due, task);
        t
    }

    /// A timeout armed `seconds` from now.
    pub fn with_after(schedule: &Schedule, seconds: u32, task: impl FnOnce() -> Result<()> + 'static) -> Timeout {
        let mut t = Timeout::new(schedule);
        t.after(seconds, task);
        t
    }

    /// Arm at the absolute time `due`, cancelling any prior arming first.
    /// Returns whether a pending task was cancelled.
    pub fn at(&mut self, due: i64, task: impl FnOnce() -> Result<()> + 'static) -> bool {
        let cancelled = self.cancel();
        self.id = Some(self.schedule.at(due, task));
        cancelled
    }

    /// Arm `seconds` from now, cancelling any prior arming first.
    pub fn after(&mut self, seconds: u32, task: impl FnOnce() -> Result<()> + 'static) -> bool {
        self.at(self.schedule.now() + i64::from(seconds), task)
    }

    /// Cancel the pending task, if any.
    pub fn cancel(&mut self) -> bool {
        match self.id.take() {
            Some(id) => self.schedule.cancel(id),
            None => false,
        }
    }

    /// Exchange pending tasks with another timeout of the same schedule.
    pub fn swap(&mut self, other: &mut Timeout) {
        debug_assert!(self.schedule.same_queue(&other.schedule));
        mem::swap(&mut self.id, &mut other.id);
    }
}

impl Drop for Timeout {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn counter_task(counter: &Rc<Cell<usize>>) -> impl FnOnce() -> Result<()> + 'static {
        let counter = Rc::clone(counter);
        move || {
            counter.set(counter.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn equal_due_times_fire_in_submission_order() {
        let clock = Clock::new();
        let schedule = Schedule::new(clock.clone());
        let order = Rc::new(RefCell::new(Vec::new()));
        let due = clock.now_secs();
        for tag in ["a", "b", "c"] {
            let order = Rc::clone(&order);
            schedule.at(due, move || {
                order.borrow_mut().push(tag);
                Ok(())
            });
        }
        assert_eq!(schedule.run().unwrap(), 0);
        assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn cancel_is_exact_and_tolerates_stale_ids() {
        let clock = Clock::new();
        let schedule = Schedule::new(clock);
        let counter = Rc::new(Cell::new(0));
        let keep = schedule.after(60, counter_task(&counter));
        let drop_ = schedule.after(60, counter_task(&counter));
        assert!(schedule.cancel(drop_));
        assert!(!schedule.cancel(drop_), "second cancel is a miss");
        assert_eq!(schedule.len(), 1);
        assert!(schedule.cancel(keep));
        assert!(schedule.is_empty());
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn tasks_may_schedule_more_tasks() {
        let clock = Clock::new();
        let schedule = Schedule::new(clock.clone());
        let counter = Rc::new(Cell::new(0));
        let inner_counter = Rc::clone(&counter);
        let sched2 = schedule.clone();
        let due = clock.now_secs();
        schedule.at(due, move || {
            sched2.at(due, counter_task(&inner_counter));
            Ok(())
        });
        assert_eq!(schedule.run().unwrap(), 0);
        assert_eq!(counter.get(), 1, "the task scheduled by a task fires in the same run");
    }

    #[test]
    fn dropping_a_timeout_cancels_its_task() {
        let clock = Clock::new();
        let schedule = Schedule::new(clock.clone());
        let counter = Rc::new(Cell::new(0));
        {
            let _t = Timeout::with_at(&schedule, clock.now_secs(), counter_task(&counter));
        }
        assert_eq!(schedule.run().unwrap(), 0);
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn rearming_a_timeout_cancels_the_prior_task() {
        let clock = Clock::new();
        let schedule = Schedule::new(clock.clone());
        let counter = Rc::new(Cell::new(0));
        let mut t = Timeout::with_at(&schedule, clock.now_secs(), counter_task(&counter));
        assert!(t.at(clock.now_secs(), counter_task(&counter)));
        schedule.run().unwrap();
        assert_eq!(counter.get(), 1);
        assert!(!t.after(5, counter_task(&counter)), "fired task is not cancelled");
        assert!(t.cancel());
    }

    #[test]
    fn swap_exchanges_pending_tasks() {
        let clock = Clock::new();
        let schedule = Schedule::new(clock.clone());
        let counter = Rc::new(Cell::new(0));
        let mut armed = Timeout::with_after(&schedule, 60, counter_task(&counter));
        let mut idle = Timeout::new(&schedule);
        armed.swap(&mut idle);
        assert!(!armed.cancel());
        assert!(idle.cancel());
        assert!(schedule.is_empty());
    }
}
