//! Completion tracking for queued operations.
//!
//! Queues that execute on host threads number their operations and publish progress through a
//! [`TimelineSignal`]: a monotonically increasing counter that waiters block on. An [`Event`]
//! names one point on such a timeline (or a backend-native event), and a [`WaitList`] gates the
//! start of a later operation on several events.
//!
//! ```ignore
//! let signal = CpuTimelineSignal::new();
//!
//! // worker thread
//! signal.set(1);
//!
//! // submitting thread
//! signal.wait(1, 1000)?;
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;

use crate::error::{QueueFailedSnafu, Result};

/// Monotonic timeline signal.
pub trait TimelineSignal: Send + Sync + fmt::Debug {
    fn value(&self) -> u64;

    /// Advance the signal to `value` and wake waiters.
    fn set(&self, value: u64);

    /// Record that the operation numbered `value` failed.
    ///
    /// Only the first failure is kept. Waits on `value` or any later point report it.
    fn fail(&self, value: u64, message: String);

    /// Block until the signal reaches `value` (`timeout_ms == 0` waits forever).
    fn wait(&self, value: u64, timeout_ms: u64) -> Result<()>;

    fn is_reached(&self, value: u64) -> bool {
        self.value() >= value
    }
}

/// Timeline signal for host-thread execution: an `AtomicU64` plus a `parking_lot` condvar.
#[derive(Debug)]
pub struct CpuTimelineSignal {
    value: AtomicU64,
    mutex: Mutex<()>,
    condvar: Condvar,
    failure: Mutex<Option<(u64, String)>>,
}

impl Default for CpuTimelineSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuTimelineSignal {
    pub fn new() -> Self {
        Self::with_initial(0)
    }

    pub fn with_initial(initial: u64) -> Self {
        Self { value: AtomicU64::new(initial), mutex: Mutex::new(()), condvar: Condvar::new(), failure: Mutex::new(None) }
    }

    fn check_failure(&self, target: u64) -> Result<()> {
        match &*self.failure.lock() {
            Some((failed, message)) if *failed <= target => QueueFailedSnafu { message: message.clone() }.fail(),
            _ => Ok(()),
        }
    }

    fn timeout_error(&self, timeout_ms: u64, target: u64) -> crate::error::Error {
        QueueFailedSnafu {
            message: format!(
                "timeline signal timeout: waited {timeout_ms}ms for value {target}, current {}",
                self.value.load(Ordering::Acquire)
            ),
        }
        .build()
    }
}

impl TimelineSignal for CpuTimelineSignal {
    fn value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    fn set(&self, value: u64) {
        // Taking the lock orders the store against a waiter between its check and its sleep.
        let _guard = self.mutex.lock();
        self.value.fetch_max(value, Ordering::AcqRel);
        self.condvar.notify_all();
    }

    fn fail(&self, value: u64, message: String) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some((value, message));
        }
    }

    fn wait(&self, target: u64, timeout_ms: u64) -> Result<()> {
        if self.value.load(Ordering::Acquire) >= target {
            return self.check_failure(target);
        }

        let mut guard = self.mutex.lock();
        if timeout_ms == 0 {
            while self.value.load(Ordering::Acquire) < target {
                self.condvar.wait(&mut guard);
            }
        } else {
            let deadline = Instant::now() + Duration::from_millis(timeout_ms);
            while self.value.load(Ordering::Acquire) < target {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(self.timeout_error(timeout_ms, target));
                }
                let result = self.condvar.wait_for(&mut guard, remaining);
                if result.timed_out() && self.value.load(Ordering::Acquire) < target {
                    return Err(self.timeout_error(timeout_ms, target));
                }
            }
        }
        drop(guard);
        self.check_failure(target)
    }
}

/// Completion handle of one queued operation.
#[derive(Clone, Default)]
pub enum Event {
    /// Nothing was submitted (zero-length transfers) or the operation ran synchronously.
    #[default]
    Complete,
    Timeline {
        signal: Arc<dyn TimelineSignal>,
        value: u64,
    },
    #[cfg(feature = "opencl")]
    OpenCl(Arc<crate::opencl::ClEvent>),
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => f.write_str("Complete"),
            Self::Timeline { value, .. } => f.debug_struct("Timeline").field("value", value).finish(),
            #[cfg(feature = "opencl")]
            Self::OpenCl(_) => f.write_str("OpenCl"),
        }
    }
}

impl Event {
    /// Block until the operation finishes, returning its failure if it had one.
    pub fn wait(&self) -> Result<()> {
        match self {
            Self::Complete => Ok(()),
            Self::Timeline { signal, value } => signal.wait(*value, 0),
            #[cfg(feature = "opencl")]
            Self::OpenCl(event) => event.wait(),
        }
    }

    pub fn is_complete(&self) -> bool {
        match self {
            Self::Complete => true,
            Self::Timeline { signal, value } => signal.is_reached(*value),
            #[cfg(feature = "opencl")]
            Self::OpenCl(event) => event.is_complete(),
        }
    }
}

/// Events an operation waits for before it starts.
#[derive(Debug, Clone, Default)]
pub struct WaitList(SmallVec<[Event; 4]>);

impl WaitList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        if !matches!(event, Event::Complete) {
            self.0.push(event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.0.iter()
    }

    pub fn wait_all(&self) -> Result<()> {
        self.0.iter().try_for_each(Event::wait)
    }
}

impl From<Event> for WaitList {
    fn from(event: Event) -> Self {
        let mut list = Self::new();
        list.push(event);
        list
    }
}

impl FromIterator<Event> for WaitList {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        let mut list = Self::new();
        for event in iter {
            list.push(event);
        }
        list
    }
}
