use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    os::fd::RawFd,
    time::{Duration, Instant},
};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    deadline: Instant,
    fd: RawFd,
    generation: u64,
}

/// Monotonic min-heap of idle deadlines, one live entry per fd.
///
/// Cancellation is lazy: [`adjust`](Self::adjust) and [`del`](Self::del)
/// bump or drop the fd's live generation, turning any older heap entry into
/// a tombstone that [`tick`](Self::tick) discards when it surfaces.
#[derive(Default)]
pub struct TimerHeap {
    heap: BinaryHeap<Reverse<Entry>>,
    live: HashMap<RawFd, u64>,
    next_generation: u64,
}

impl TimerHeap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) `fd` to expire after `timeout`.
    pub fn add(&mut self, fd: RawFd, timeout: Duration) {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.live.insert(fd, generation);
        self.heap.push(Reverse(Entry { deadline: Instant::now() + timeout, fd, generation }));
    }

    /// Push the fd's deadline out; the previous entry becomes a tombstone.
    pub fn adjust(&mut self, fd: RawFd, timeout: Duration) {
        self.add(fd, timeout);
    }

    /// Cancel the fd's timer without firing it.
    pub fn del(&mut self, fd: RawFd) {
        self.live.remove(&fd);
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.live.contains_key(&fd)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Fire every live entry whose deadline has passed.
    pub fn tick<F: FnMut(RawFd)>(&mut self, mut on_expire: F) {
        let now = Instant::now();
        while let Some(Reverse(entry)) = self.heap.peek().copied() {
            if entry.deadline > now {
                break;
            }
            self.heap.pop();
            if self.live.get(&entry.fd) == Some(&entry.generation) {
                self.live.remove(&entry.fd);
                on_expire(entry.fd);
            }
        }
    }

    /// Time until the earliest live deadline, or `None` when idle. Stale
    /// tops are discarded on the way so the poller never waits on a
    /// tombstone.
    pub fn next_wait(&mut self) -> Option<Duration> {
        let now = Instant::now();
        while let Some(Reverse(entry)) = self.heap.peek().copied() {
            if self.live.get(&entry.fd) == Some(&entry.generation) {
                return Some(entry.deadline.saturating_duration_since(now));
            }
            self.heap.pop();
        }
        None
    }

    /// Fire everything still live, deadline or not. Shutdown path.
    pub fn expire_all<F: FnMut(RawFd)>(&mut self, mut on_expire: F) {
        for (fd, _) in self.live.drain() {
            on_expire(fd);
        }
        self.heap.clear();
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use super::*;

    const SHORT: Duration = Duration::from_millis(20);

    fn fired(timers: &mut TimerHeap) -> Vec<RawFd> {
        let mut out = Vec::new();
        timers.tick(|fd| out.push(fd));
        out
    }

    #[test]
    fn fires_only_past_deadlines() {
        let mut timers = TimerHeap::new();
        timers.add(3, SHORT);
        timers.add(4, Duration::from_secs(60));
        thread::sleep(SHORT * 2);
        assert_eq!(fired(&mut timers), vec![3]);
        assert!(timers.contains(4));
        assert!(!timers.contains(3));
    }

    #[test]
    fn adjust_tombstones_the_old_entry() {
        let mut timers = TimerHeap::new();
        timers.add(7, SHORT);
        timers.adjust(7, Duration::from_secs(60));
        thread::sleep(SHORT * 2);
        assert!(fired(&mut timers).is_empty());
        assert!(timers.contains(7));
        assert_eq!(timers.len(), 1);
    }

    #[test]
    fn del_cancels() {
        let mut timers = TimerHeap::new();
        timers.add(9, SHORT);
        timers.del(9);
        thread::sleep(SHORT * 2);
        assert!(fired(&mut timers).is_empty());
        assert!(timers.is_empty());
    }

    #[test]
    fn next_wait_tracks_the_earliest_live_entry() {
        let mut timers = TimerHeap::new();
        assert_eq!(timers.next_wait(), None);

        timers.add(1, Duration::from_secs(60));
        timers.add(2, Duration::from_secs(5));
        let wait = timers.next_wait().unwrap();
        assert!(wait <= Duration::from_secs(5));
        assert!(wait > Duration::from_secs(4));

        // cancelling the nearer entry moves the wait out
        timers.del(2);
        let wait = timers.next_wait().unwrap();
        assert!(wait > Duration::from_secs(50));
    }

    #[test]
    fn expire_all_fires_everything() {
        let mut timers = TimerHeap::new();
        timers.add(1, Duration::from_secs(60));
        timers.add(2, Duration::from_secs(60));
        let mut out = Vec::new();
        timers.expire_all(|fd| out.push(fd));
        out.sort_unstable();
        assert_eq!(out, vec![1, 2]);
        assert!(timers.is_empty());
        assert_eq!(timers.next_wait(), None);
    }
}
