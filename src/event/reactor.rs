//! The readiness reactor.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, trace, warn};

use super::timer::{nearest_deadline, TimeEvent, TimerCallback, TimerId, TimerKind};

/// Lower bound on how long one iteration waits.
pub const MIN_WAIT: Duration = Duration::from_millis(10);

/// How long an iteration waits when no timer is scheduled.
pub const IDLE_WAIT: Duration = Duration::from_secs(1);

const EVENTS_CAPACITY: usize = 1024;

/// Readiness a file callback is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mask {
    Readable,
    Writable,
}

impl Mask {
    fn interest(self) -> Interest {
        match self {
            Mask::Readable => Interest::READABLE,
            Mask::Writable => Interest::WRITABLE,
        }
    }
}

/// Callback invoked when a descriptor becomes ready.
pub type FileCallback<S> = Rc<dyn Fn(&mut EventLoop<S>, &mut S, RawFd)>;

/// The callbacks armed on one descriptor.
struct FileEvent<S> {
    readable: Option<FileCallback<S>>,
    writable: Option<FileCallback<S>>,
}

impl<S> FileEvent<S> {
    fn empty() -> Self {
        Self {
            readable: None,
            writable: None,
        }
    }

    fn slot(&self, mask: Mask) -> Option<&FileCallback<S>> {
        match mask {
            Mask::Readable => self.readable.as_ref(),
            Mask::Writable => self.writable.as_ref(),
        }
    }

    fn slot_mut(&mut self, mask: Mask) -> &mut Option<FileCallback<S>> {
        match mask {
            Mask::Readable => &mut self.readable,
            Mask::Writable => &mut self.writable,
        }
    }

    /// The combined mio interest, `None` once nothing is armed.
    fn interest(&self) -> Option<Interest> {
        match (self.readable.is_some(), self.writable.is_some()) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

/// A single-threaded event loop delivering file readiness and timer events.
///
/// `S` is the state every callback receives mutably; the loop itself is
/// passed too so callbacks can register, deregister, schedule or cancel
/// events, their own included.
///
/// # Example
///
/// ```
/// use emberkv::event::{EventLoop, TimerKind};
/// use std::time::Duration;
///
/// let mut el: EventLoop<u32> = EventLoop::new().unwrap();
/// el.schedule(TimerKind::Repeating, Duration::from_millis(1), |el, ticks, _| {
///     *ticks += 1;
///     if *ticks == 3 {
///         el.stop();
///     }
/// });
///
/// let mut ticks = 0;
/// el.run(&mut ticks);
/// assert_eq!(ticks, 3);
/// ```
pub struct EventLoop<S> {
    poll: Poll,
    events: Events,
    files: HashMap<RawFd, FileEvent<S>>,
    timers: Vec<TimeEvent<S>>,
    last_timer_id: u64,
    stopped: bool,
}

impl<S> fmt::Debug for EventLoop<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("files", &self.files.len())
            .field("timers", &self.timers)
            .field("stopped", &self.stopped)
            .finish()
    }
}

impl<S> EventLoop<S> {
    /// Creates the loop and its mio `Poll`.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENTS_CAPACITY),
            files: HashMap::new(),
            timers: Vec::new(),
            last_timer_id: 0,
            stopped: false,
        })
    }

    /// Arms `callback` for `mask` readiness on `fd`.
    ///
    /// Registering an interest that is already armed is a no-op and keeps the
    /// existing callback. If mio rejects the descriptor the error is logged and
    /// returned, and earlier registrations stay as they were.
    pub fn register<F>(&mut self, fd: RawFd, mask: Mask, callback: F) -> io::Result<()>
    where
        F: Fn(&mut EventLoop<S>, &mut S, RawFd) + 'static,
    {
        let current = self.files.get(&fd);
        if current.is_some_and(|file| file.slot(mask).is_some()) {
            return Ok(());
        }

        let armed = current.and_then(FileEvent::interest);
        let registry = self.poll.registry();
        let result = match armed {
            Some(existing) => registry.reregister(
                &mut SourceFd(&fd),
                Token(fd as usize),
                existing | mask.interest(),
            ),
            None => registry.register(&mut SourceFd(&fd), Token(fd as usize), mask.interest()),
        };

        if let Err(e) = result {
            warn!(fd, ?mask, error = %e, "Failed to register file event");
            return Err(e);
        }

        *self
            .files
            .entry(fd)
            .or_insert_with(FileEvent::empty)
            .slot_mut(mask) = Some(Rc::new(callback));
        trace!(fd, ?mask, "Registered file event");
        Ok(())
    }

    /// Disarms `mask` on `fd`. The other interest, if armed, stays registered.
    pub fn deregister(&mut self, fd: RawFd, mask: Mask) {
        let Some(file) = self.files.get_mut(&fd) else {
            return;
        };
        if file.slot_mut(mask).take().is_none() {
            return;
        }

        let remaining = file.interest();
        let registry = self.poll.registry();
        let result = match remaining {
            Some(interest) => registry.reregister(&mut SourceFd(&fd), Token(fd as usize), interest),
            None => {
                self.files.remove(&fd);
                registry.deregister(&mut SourceFd(&fd))
            }
        };

        if let Err(e) = result {
            warn!(fd, ?mask, error = %e, "Failed to deregister file event");
        }
        trace!(fd, ?mask, "Deregistered file event");
    }

    pub fn is_registered(&self, fd: RawFd, mask: Mask) -> bool {
        self.files
            .get(&fd)
            .is_some_and(|file| file.slot(mask).is_some())
    }

    /// Schedules a timer firing `period` from now.
    pub fn schedule<F>(&mut self, kind: TimerKind, period: Duration, callback: F) -> TimerId
    where
        F: Fn(&mut EventLoop<S>, &mut S, TimerId) + 'static,
    {
        self.last_timer_id += 1;
        let id = TimerId(self.last_timer_id);
        let callback: TimerCallback<S> = Rc::new(callback);

        self.timers.push(TimeEvent {
            id,
            kind,
            period,
            deadline: Instant::now() + period,
            callback,
        });
        trace!(%id, ?kind, ?period, "Scheduled timer");
        id
    }

    /// Removes a timer. Returns false if it was not scheduled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.timers.iter().position(|t| t.id == id) {
            Some(idx) => {
                self.timers.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, id: TimerId) -> bool {
        self.timers.iter().any(|t| t.id == id)
    }

    /// Makes `run` return after the current iteration.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Runs iterations until [`EventLoop::stop`] is called.
    pub fn run(&mut self, state: &mut S) {
        while !self.stopped {
            self.run_once(state);
        }
    }

    /// How long the next iteration may block.
    fn wait_timeout(&self, now: Instant) -> Duration {
        let nearest = nearest_deadline(&self.timers).unwrap_or(now + IDLE_WAIT);
        nearest.saturating_duration_since(now).max(MIN_WAIT)
    }

    /// One iteration: wait for readiness or the nearest timer, run due timers,
    /// then ready file callbacks. Returns the number of callbacks invoked.
    pub fn run_once(&mut self, state: &mut S) -> usize {
        let timeout = self.wait_timeout(Instant::now());

        if let Err(e) = self.poll.poll(&mut self.events, Some(timeout)) {
            if e.kind() == io::ErrorKind::Interrupted {
                debug!("Poll interrupted");
            } else {
                warn!(error = %e, "Poll failed");
            }
        }

        let mut ready = Vec::with_capacity(self.events.iter().count() * 2);
        for event in self.events.iter() {
            let fd = event.token().0 as RawFd;
            if event.is_readable() || event.is_read_closed() || event.is_error() {
                ready.push((fd, Mask::Readable));
            }
            if event.is_writable() || event.is_write_closed() || event.is_error() {
                ready.push((fd, Mask::Writable));
            }
        }

        let now = Instant::now();
        let due: Vec<TimerId> = self
            .timers
            .iter()
            .filter(|t| t.is_due(now))
            .map(|t| t.id)
            .collect();

        let mut processed = 0;
        for id in due {
            processed += usize::from(self.fire_timer(state, id));
        }

        for (fd, mask) in ready {
            // An earlier callback may have disarmed this one.
            let Some(callback) = self.files.get(&fd).and_then(|f| f.slot(mask)).cloned() else {
                continue;
            };
            callback(self, state, fd);
            processed += 1;
        }

        processed
    }

    fn fire_timer(&mut self, state: &mut S, id: TimerId) -> bool {
        let Some(idx) = self.timers.iter().position(|t| t.id == id) else {
            return false;
        };

        let timer = &self.timers[idx];
        let callback = Rc::clone(&timer.callback);
        if timer.kind == TimerKind::OneShot {
            self.timers.remove(idx);
        }

        callback(self, state, id);

        // The callback may have cancelled it.
        if let Some(timer) = self.timers.iter_mut().find(|t| t.id == id) {
            timer.deadline = Instant::now() + timer.period;
        }
        true
    }
}
