//! Single-threaded reactor: `poll(2)` readiness over registered descriptors
//! plus a small list of software timers.
//!
//! The loop never calls into user code through stored closures. Each
//! registration carries a plain tag (`H::FileProc` / `H::TimeProc`) and the
//! loop hands fired tags back to an [`EventHandler`] together with `&mut`
//! access to itself, so callbacks can register and unregister freely.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, poll};
use tracing::{debug, trace, warn};

/// Upper bound on one wait when no timer is nearer.
pub const MAX_WAIT_MS: u64 = 1000;
/// Wait used when the nearest timer is already due.
pub const DUE_WAIT_MS: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeType {
    Readable,
    Writable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeType {
    /// Fires once, then is removed.
    Once,
    /// Rescheduled `interval` after every fire.
    Normal,
}

pub type TimerId = u64;

/// Receiver of fired events. `FileProc` and `TimeProc` are the closed set
/// of callback kinds the owner registers.
pub trait EventHandler: Sized {
    type FileProc: Copy + fmt::Debug;
    type TimeProc: Copy + fmt::Debug;

    fn file_event(&mut self, el: &mut AeLoop<Self>, fd: RawFd, mask: FeType, proc_: Self::FileProc);

    fn time_event(&mut self, el: &mut AeLoop<Self>, id: TimerId, proc_: Self::TimeProc);
}

struct FileEvent<P> {
    // duplicated handle, keeps the descriptor valid for poll while registered
    fd: OwnedFd,
    read: Option<P>,
    write: Option<P>,
}

impl<P: Copy> FileEvent<P> {
    fn poll_flags(&self) -> PollFlags {
        let mut events = PollFlags::empty();
        if self.read.is_some() {
            events |= PollFlags::POLLIN;
        }
        if self.write.is_some() {
            events |= PollFlags::POLLOUT;
        }
        events
    }

    fn proc_for(&self, mask: FeType) -> Option<P> {
        match mask {
            FeType::Readable => self.read,
            FeType::Writable => self.write,
        }
    }

    fn slot(&mut self, mask: FeType) -> &mut Option<P> {
        match mask {
            FeType::Readable => &mut self.read,
            FeType::Writable => &mut self.write,
        }
    }
}

struct TimeEvent<P> {
    id: TimerId,
    mask: TeType,
    when: u64,
    interval: u64,
    proc_: P,
}

pub struct AeLoop<H: EventHandler> {
    file_events: HashMap<RawFd, FileEvent<H::FileProc>>,
    time_events: Vec<TimeEvent<H::TimeProc>>,
    time_event_next_id: TimerId,
    stop: bool,
}

impl<H: EventHandler> Default for AeLoop<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: EventHandler> AeLoop<H> {
    pub fn new() -> Self {
        Self {
            file_events: HashMap::new(),
            time_events: Vec::new(),
            time_event_next_id: 1,
            stop: false,
        }
    }

    /// Arms `mask` on `fd`. Adding an interest the fd already has is a no-op;
    /// adding the opposite one keeps both armed.
    pub fn add_file_event(
        &mut self,
        fd: impl AsFd,
        mask: FeType,
        proc_: H::FileProc,
    ) -> io::Result<()> {
        let raw = fd.as_fd().as_raw_fd();
        if let Some(fe) = self.file_events.get_mut(&raw) {
            let slot = fe.slot(mask);
            if slot.is_none() {
                *slot = Some(proc_);
                trace!(fd = raw, ?mask, "ae modify file event");
            }
            return Ok(());
        }

        let owned = fd.as_fd().try_clone_to_owned()?;
        let mut fe = FileEvent {
            fd: owned,
            read: None,
            write: None,
        };
        *fe.slot(mask) = Some(proc_);
        self.file_events.insert(raw, fe);
        trace!(fd = raw, ?mask, "ae add file event");
        Ok(())
    }

    /// Disarms exactly `mask`. The fd leaves the poll set once neither
    /// interest remains.
    pub fn remove_file_event(&mut self, fd: RawFd, mask: FeType) {
        let Some(fe) = self.file_events.get_mut(&fd) else {
            return;
        };
        *fe.slot(mask) = None;
        if fe.read.is_none() && fe.write.is_none() {
            self.file_events.remove(&fd);
        }
        trace!(fd, ?mask, "ae remove file event");
    }

    pub fn has_file_event(&self, fd: RawFd, mask: FeType) -> bool {
        self.file_events
            .get(&fd)
            .is_some_and(|fe| fe.proc_for(mask).is_some())
    }

    pub fn add_time_event(&mut self, mask: TeType, interval_ms: u64, proc_: H::TimeProc) -> TimerId {
        let id = self.time_event_next_id;
        self.time_event_next_id += 1;
        self.time_events.push(TimeEvent {
            id,
            mask,
            when: get_monotonic_time_ms() + interval_ms,
            interval: interval_ms,
            proc_,
        });
        id
    }

    pub fn remove_time_event(&mut self, id: TimerId) {
        if let Some(pos) = self.time_events.iter().position(|te| te.id == id) {
            self.time_events.remove(pos);
        }
    }

    pub fn has_time_event(&self, id: TimerId) -> bool {
        self.time_events.iter().any(|te| te.id == id)
    }

    pub fn stop(&mut self) {
        self.stop = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stop
    }

    fn nearest_time(&self, now: u64) -> u64 {
        self.time_events
            .iter()
            .map(|te| te.when)
            .fold(now + MAX_WAIT_MS, u64::min)
    }

    /// Milliseconds the next wait may block for.
    pub fn wait_timeout(&self) -> i32 {
        let now = get_monotonic_time_ms();
        let nearest = self.nearest_time(now);
        if nearest <= now {
            DUE_WAIT_MS
        } else {
            (nearest - now) as i32
        }
    }

    /// Blocks for readiness, then collects the due timers and the ready
    /// file events.
    fn wait(&self) -> (Vec<TimerId>, Vec<(RawFd, FeType)>) {
        let timeout = self.wait_timeout();

        let registered: Vec<(RawFd, &FileEvent<H::FileProc>)> =
            self.file_events.iter().map(|(fd, fe)| (*fd, fe)).collect();
        let mut poll_fds: Vec<PollFd> = registered
            .iter()
            .map(|(_, fe)| PollFd::new(&fe.fd, fe.poll_flags()))
            .collect();

        let mut fired = Vec::new();
        match poll(&mut poll_fds, timeout) {
            Ok(n) => {
                if n > 0 {
                    trace!(n, "ae got events");
                }
                for (poll_fd, (fd, fe)) in poll_fds.iter().zip(&registered) {
                    let revents = poll_fd.revents().unwrap_or(PollFlags::empty());
                    let broken = revents.intersects(
                        PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL,
                    );
                    if fe.read.is_some() && (revents.contains(PollFlags::POLLIN) || broken) {
                        fired.push((*fd, FeType::Readable));
                    }
                    if fe.write.is_some() && (revents.contains(PollFlags::POLLOUT) || broken) {
                        fired.push((*fd, FeType::Writable));
                    }
                }
            }
            Err(Errno::EINTR) => {}
            Err(e) => warn!(error = %e, "poll error"),
        }

        let now = get_monotonic_time_ms();
        let due = self
            .time_events
            .iter()
            .filter(|te| te.when <= now)
            .map(|te| te.id)
            .collect();

        (due, fired)
    }

    /// Timers first, then I/O, each in collection order. An event whose
    /// registration disappeared during this round is skipped.
    fn process(&mut self, handler: &mut H, due: Vec<TimerId>, fired: Vec<(RawFd, FeType)>) {
        for id in due {
            let Some(te) = self.time_events.iter().find(|te| te.id == id) else {
                continue;
            };
            let (mask, proc_) = (te.mask, te.proc_);
            handler.time_event(self, id, proc_);
            match mask {
                TeType::Once => self.remove_time_event(id),
                TeType::Normal => {
                    if let Some(te) = self.time_events.iter_mut().find(|te| te.id == id) {
                        te.when = get_monotonic_time_ms() + te.interval;
                    }
                }
            }
        }

        if !fired.is_empty() {
            debug!(count = fired.len(), "ae processing file events");
        }
        for (fd, mask) in fired {
            let Some(proc_) = self.file_events.get(&fd).and_then(|fe| fe.proc_for(mask)) else {
                continue;
            };
            handler.file_event(self, fd, mask, proc_);
        }
    }

    /// One wait-and-dispatch round.
    pub fn process_events(&mut self, handler: &mut H) {
        let (due, fired) = self.wait();
        self.process(handler, due, fired);
    }

    pub fn run(&mut self, handler: &mut H) {
        while !self.stop {
            self.process_events(handler);
        }
    }
}

/// Monotonic milliseconds since first use; the timer clock.
pub fn get_monotonic_time_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_millis() as u64
}

/// Wall clock in milliseconds since the Unix epoch; used for key deadlines.
pub fn get_current_time_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    #[derive(Default)]
    struct Recorder {
        log: Vec<String>,
        stop_after: Option<usize>,
    }

    impl EventHandler for Recorder {
        type FileProc = &'static str;
        type TimeProc = &'static str;

        fn file_event(&mut self, el: &mut AeLoop<Self>, _fd: RawFd, mask: FeType, proc_: &'static str) {
            self.log.push(format!("{proc_}:{mask:?}"));
            self.maybe_stop(el);
        }

        fn time_event(&mut self, el: &mut AeLoop<Self>, id: TimerId, proc_: &'static str) {
            self.log.push(format!("{proc_}#{id}"));
            self.maybe_stop(el);
        }
    }

    impl Recorder {
        fn maybe_stop(&self, el: &mut AeLoop<Self>) {
            if self.stop_after.is_some_and(|n| self.log.len() >= n) {
                el.stop();
            }
        }
    }

    #[test]
    fn test_timer_ids_increase_and_remove() {
        let mut el: AeLoop<Recorder> = AeLoop::new();
        let a = el.add_time_event(TeType::Normal, 1000, "a");
        let b = el.add_time_event(TeType::Once, 1000, "b");
        assert_eq!((a, b), (1, 2));

        el.remove_time_event(a);
        assert!(!el.has_time_event(a));
        assert!(el.has_time_event(b));

        let c = el.add_time_event(TeType::Once, 1000, "c");
        assert_eq!(c, 3);
    }

    #[test]
    fn test_wait_timeout() {
        let mut el: AeLoop<Recorder> = AeLoop::new();
        let idle = el.wait_timeout();
        assert!(idle > 900 && idle <= MAX_WAIT_MS as i32);

        el.add_time_event(TeType::Once, 200, "soon");
        let soon = el.wait_timeout();
        assert!(soon > 100 && soon <= 200);

        el.add_time_event(TeType::Once, 0, "due");
        assert_eq!(el.wait_timeout(), DUE_WAIT_MS);
    }

    #[test]
    fn test_once_timer_fires_once_and_normal_reschedules() {
        let mut el = AeLoop::new();
        let once = el.add_time_event(TeType::Once, 0, "once");
        let normal = el.add_time_event(TeType::Normal, 0, "normal");
        let mut rec = Recorder::default();

        el.process_events(&mut rec);
        assert_eq!(rec.log, vec![format!("once#{once}"), format!("normal#{normal}")]);
        assert!(!el.has_time_event(once));
        assert!(el.has_time_event(normal));

        el.process_events(&mut rec);
        assert_eq!(rec.log.len(), 3);
        assert_eq!(rec.log[2], format!("normal#{normal}"));
    }

    #[test]
    fn test_interest_add_modify_remove() {
        let (a, _b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();
        let mut el: AeLoop<Recorder> = AeLoop::new();

        el.add_file_event(&a, FeType::Readable, "read").unwrap();
        el.add_file_event(&a, FeType::Readable, "other").unwrap();
        el.add_file_event(&a, FeType::Writable, "write").unwrap();
        assert!(el.has_file_event(fd, FeType::Readable));
        assert!(el.has_file_event(fd, FeType::Writable));

        el.remove_file_event(fd, FeType::Readable);
        assert!(!el.has_file_event(fd, FeType::Readable));
        assert!(el.has_file_event(fd, FeType::Writable));
        assert!(el.file_events.contains_key(&fd));

        el.remove_file_event(fd, FeType::Writable);
        assert!(!el.file_events.contains_key(&fd));
    }

    #[test]
    fn test_registering_same_interest_keeps_first_proc() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let mut el = AeLoop::new();
        el.add_file_event(&a, FeType::Readable, "first").unwrap();
        el.add_file_event(&a, FeType::Readable, "second").unwrap();

        b.write_all(b"x").unwrap();
        let mut rec = Recorder::default();
        el.process_events(&mut rec);
        assert_eq!(rec.log, vec!["first:Readable".to_string()]);
    }

    #[test]
    fn test_timers_fire_before_io() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let mut el = AeLoop::new();
        el.add_file_event(&a, FeType::Readable, "read").unwrap();
        let id = el.add_time_event(TeType::Once, 0, "cron");

        b.write_all(b"ping").unwrap();
        let mut rec = Recorder::default();
        el.process_events(&mut rec);
        assert_eq!(rec.log, vec![format!("cron#{id}"), "read:Readable".to_string()]);
    }

    #[test]
    fn test_run_until_stopped() {
        let mut el = AeLoop::new();
        el.add_time_event(TeType::Normal, 1, "tick");
        let mut rec = Recorder {
            stop_after: Some(3),
            ..Recorder::default()
        };
        el.run(&mut rec);
        assert!(el.is_stopped());
        assert_eq!(rec.log.len(), 3);
    }
}
