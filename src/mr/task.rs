//! The per-phase task-dispatch state machine: `Idle -> Processing -> Moving -> Done`.
//!
//! One [`TaskSet`] tracks every task of a single phase (map or reduce). The
//! coordinator owns two of them side by side and never shares state between
//! the two beyond the `done(map)` gate in [`crate::mr::coordinator`].

use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::seq::SliceRandom;
use tokio::sync::mpsc;

/// Re-dispatch eligibility: a `Processing` task older than this many seconds
/// is assumed abandoned by its worker and handed to the next asker.
pub const DEFAULT_TIMEOUT_SECS: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskStatus {
    Idle = 0,
    Processing = 1,
    Moving = 2,
    Done = 3,
}

impl TaskStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskStatus::Idle,
            1 => TaskStatus::Processing,
            2 => TaskStatus::Moving,
            3 => TaskStatus::Done,
            other => unreachable!("invalid task status byte {other}"),
        }
    }
}

/// What a caller of [`TaskSet::get_idle_task`] should tell the worker to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchCmd {
    /// An index was handed out, go process it.
    Process,
    /// Nothing assignable right now, but the phase isn't done either.
    Wait,
    /// Every task in this phase reached `Done`.
    Done,
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i64
}

/// Tracks every task of one phase: status array, idle queue, launch timestamps.
///
/// The status array is the single source of truth; every transition out of
/// `Processing` or `Moving` goes through a compare-and-swap so two racing
/// committers (or a committer racing a timeout re-dispatch) always produce a
/// single winner. The idle queue is write-once-per-index: an index is
/// enqueued exactly once at construction and dequeued at most once ever.
/// Rescheduling is done purely by the timeout scan, never by re-enqueuing.
#[derive(Debug)]
pub struct TaskSet {
    len: usize,
    status: Vec<AtomicU8>,
    launch_ts: Vec<AtomicI64>,
    idle_tx: mpsc::Sender<usize>,
    idle_rx: Mutex<mpsc::Receiver<usize>>,
    timeout_secs: i64,
    done: AtomicU8,
}

impl TaskSet {
    pub fn new(len: usize) -> Self {
        Self::with_timeout(len, DEFAULT_TIMEOUT_SECS)
    }

    /// Same as [`TaskSet::new`] but with an overridable timeout, so tests
    /// don't have to sleep for the production value.
    pub fn with_timeout(len: usize, timeout_secs: i64) -> Self {
        let (idle_tx, idle_rx) = mpsc::channel(len.max(1));
        for i in 0..len {
            idle_tx
                .try_send(i)
                .expect("idle queue sized to hold every index once");
        }
        Self {
            len,
            status: (0..len).map(|_| AtomicU8::new(TaskStatus::Idle as u8)).collect(),
            launch_ts: (0..len).map(|_| AtomicI64::new(0)).collect(),
            idle_tx,
            idle_rx: Mutex::new(idle_rx),
            timeout_secs,
            done: AtomicU8::new(if len == 0 { 1 } else { 0 }),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn status_of(&self, i: usize) -> TaskStatus {
        TaskStatus::from_u8(self.status[i].load(Ordering::SeqCst))
    }

    /// Cheap path if already latched done; otherwise scans every status once
    /// and latches `done` if all are `Done`. Monotonic: never un-latches.
    pub fn done(&self) -> bool {
        if self.done.load(Ordering::SeqCst) != 0 {
            return true;
        }
        let all_done = self.status.iter().all(|s| {
            TaskStatus::from_u8(s.load(Ordering::SeqCst)) == TaskStatus::Done
        });
        if all_done {
            self.done.store(1, Ordering::SeqCst);
        }
        all_done
    }

    /// Dispense the next task index to a freshly-asking worker, or say
    /// `Wait`/`Done`. Never blocks on I/O; at most pops a channel and scans
    /// the status array once.
    pub fn get_idle_task(&self) -> (i64, DispatchCmd) {
        if self.done() {
            return (-1, DispatchCmd::Done);
        }

        if let Ok(task) = self.idle_rx.lock().unwrap().try_recv() {
            self.status[task].store(TaskStatus::Processing as u8, Ordering::SeqCst);
            self.launch_ts[task].store(now_secs(), Ordering::SeqCst);
            return (task as i64, DispatchCmd::Process);
        }

        // Queue is empty: look for tasks abandoned past the timeout.
        // Speculative re-dispatch of non-timed-out tasks is deliberately
        // disabled here — dispatching any not-yet-done task as soon as the
        // idle queue empties makes side-effecting user map functions run
        // more than once, which breaks the guarantee that each task runs
        // exactly once.
        let now = now_secs();
        let mut timed_out = Vec::with_capacity(self.len / 2);
        for i in 0..self.len {
            let st = self.status_of(i);
            if st != TaskStatus::Done && now - self.launch_ts[i].load(Ordering::SeqCst) > self.timeout_secs {
                timed_out.push(i);
            }
        }

        if let Some(&task) = timed_out.choose(&mut rand::thread_rng()) {
            // Refresh the launch timestamp for the winner. The CAS here is
            // Processing->Processing: it only confirms the task hasn't
            // moved on to Moving/Done between the scan and this point.
            let ok = self.status[task]
                .compare_exchange(
                    TaskStatus::Processing as u8,
                    TaskStatus::Processing as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok();
            if !ok {
                return (-1, DispatchCmd::Wait);
            }
            self.launch_ts[task].store(now, Ordering::SeqCst);
            return (task as i64, DispatchCmd::Process);
        }

        if self.done() {
            return (-1, DispatchCmd::Done);
        }
        (-1, DispatchCmd::Wait)
    }

    /// `Processing -> Moving`, the first step of publishing a task's output.
    /// Returns `false` if another committer (or a reset) already moved the
    /// task out of `Processing`.
    pub fn set_moving(&self, i: usize) -> bool {
        if i >= self.len {
            return false;
        }
        self.status[i]
            .compare_exchange(
                TaskStatus::Processing as u8,
                TaskStatus::Moving as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// `Moving -> Processing`, the rollback path when a rename fails.
    pub fn moving_fail(&self, i: usize) -> bool {
        if i >= self.len {
            return false;
        }
        self.status[i]
            .compare_exchange(
                TaskStatus::Moving as u8,
                TaskStatus::Processing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Unconditionally marks a task `Done`. Only ever called by the CAS
    /// winner from `set_moving`, so there is no race to guard against here.
    pub fn set_done(&self, i: usize) {
        if i < self.len {
            self.status[i].store(TaskStatus::Done as u8, Ordering::SeqCst);
        }
    }

    #[cfg(test)]
    pub(crate) fn status_for_test(&self, i: usize) -> TaskStatus {
        self.status_of(i)
    }
}
