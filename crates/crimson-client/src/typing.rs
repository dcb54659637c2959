//! Typing indicator debounce.
//!
//! At most one presence upsert leaves per window, measured from the last
//! publish. A change requested while the window is closed is held and sent
//! when it reopens; a change that is undone before then is never sent. The
//! indicator drops back to `false` one window after the last
//! `set_typing(true)`.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct TypingDebouncer {
    window: Duration,
    published: bool,
    last_publish: Option<Instant>,
    pending: Option<bool>,
    idle_deadline: Option<Instant>,
}

impl TypingDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            published: false,
            last_publish: None,
            pending: None,
            idle_deadline: None,
        }
    }

    /// Last value handed out for publishing.
    pub fn published(&self) -> bool {
        self.published
    }

    fn window_open(&self, now: Instant) -> bool {
        match self.last_publish {
            Some(at) => now >= at + self.window,
            None => true,
        }
    }

    /// Record what the user is doing. Returns a value to publish right away.
    pub fn set_typing(&mut self, is_typing: bool, now: Instant) -> Option<bool> {
        self.idle_deadline = is_typing.then(|| now + self.window);
        self.request(is_typing, now)
    }

    fn request(&mut self, value: bool, now: Instant) -> Option<bool> {
        if value == self.published {
            self.pending = None;
            return None;
        }
        if self.window_open(now) {
            self.pending = None;
            self.published = value;
            self.last_publish = Some(now);
            Some(value)
        } else {
            self.pending = Some(value);
            None
        }
    }

    /// Advance timers. Returns a value to publish when one became due.
    pub fn poll(&mut self, now: Instant) -> Option<bool> {
        if matches!(self.idle_deadline, Some(deadline) if now >= deadline) {
            self.idle_deadline = None;
            return self.request(false, now);
        }
        match self.pending {
            Some(value) if self.window_open(now) => self.request(value, now),
            _ => None,
        }
    }

    /// When [`Self::poll`] next has something to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let reopen = match (self.pending, self.last_publish) {
            (Some(_), Some(at)) => Some(at + self.window),
            _ => None,
        };
        match (self.idle_deadline, reopen) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// The last value returned could not be published.
    ///
    /// A failed `true` is forgotten so the next keystroke retries at once. A
    /// failed `false` stays held and goes out again when the window reopens.
    pub fn publish_failed(&mut self) {
        let failed = self.published;
        self.published = !failed;
        if failed {
            self.last_publish = None;
        } else {
            self.pending = Some(false);
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(1000);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_burst_publishes_once() {
        let t0 = Instant::now();
        let mut typing = TypingDebouncer::new(WINDOW);

        let sent: Vec<bool> = (0..10)
            .filter_map(|i| typing.set_typing(true, t0 + ms(i * 50)))
            .collect();
        assert_eq!(sent, vec![true]);
    }

    #[test]
    fn test_reverts_to_false_after_idle_window() {
        let t0 = Instant::now();
        let mut typing = TypingDebouncer::new(WINDOW);
        typing.set_typing(true, t0);
        typing.set_typing(true, t0 + ms(400));

        // deadline moves with the last keystroke
        assert_eq!(typing.next_deadline(), Some(t0 + ms(1400)));
        assert_eq!(typing.poll(t0 + ms(1000)), None);
        assert_eq!(typing.poll(t0 + ms(1400)), Some(false));
        assert!(!typing.published());
        assert_eq!(typing.next_deadline(), None);
    }

    #[test]
    fn test_change_inside_window_is_held() {
        let t0 = Instant::now();
        let mut typing = TypingDebouncer::new(WINDOW);
        assert_eq!(typing.set_typing(true, t0), Some(true));
        assert_eq!(typing.set_typing(false, t0 + ms(200)), None);
        assert_eq!(typing.next_deadline(), Some(t0 + WINDOW));
        assert_eq!(typing.poll(t0 + WINDOW), Some(false));
    }

    #[test]
    fn test_undone_change_is_never_sent() {
        let t0 = Instant::now();
        let mut typing = TypingDebouncer::new(WINDOW);
        typing.set_typing(true, t0);
        typing.set_typing(false, t0 + ms(100));
        assert_eq!(typing.set_typing(true, t0 + ms(200)), None);

        // nothing held any more; only the idle revert remains
        assert_eq!(typing.poll(t0 + WINDOW), None);
        assert_eq!(typing.poll(t0 + ms(1200)), Some(false));
    }

    #[test]
    fn test_publish_failure_allows_retry() {
        let t0 = Instant::now();
        let mut typing = TypingDebouncer::new(WINDOW);
        assert_eq!(typing.set_typing(true, t0), Some(true));
        typing.publish_failed();
        assert_eq!(typing.set_typing(true, t0 + ms(10)), Some(true));
    }

    #[test]
    fn test_failed_revert_is_retried_next_window() {
        let t0 = Instant::now();
        let mut typing = TypingDebouncer::new(WINDOW);
        assert_eq!(typing.set_typing(true, t0), Some(true));
        assert_eq!(typing.poll(t0 + WINDOW), Some(false));

        typing.publish_failed();
        assert!(typing.published());
        assert_eq!(typing.next_deadline(), Some(t0 + ms(2000)));
        assert_eq!(typing.poll(t0 + ms(1500)), None);
        assert_eq!(typing.poll(t0 + ms(2000)), Some(false));
        assert!(!typing.published());
        assert_eq!(typing.next_deadline(), None);
    }

    #[test]
    fn test_keystroke_cancels_failed_revert() {
        let t0 = Instant::now();
        let mut typing = TypingDebouncer::new(WINDOW);
        typing.set_typing(true, t0);
        typing.poll(t0 + WINDOW);
        typing.publish_failed();

        // still typing as far as the room knows; nothing to send
        assert_eq!(typing.set_typing(true, t0 + ms(1200)), None);
        assert_eq!(typing.next_deadline(), Some(t0 + ms(2200)));
        assert_eq!(typing.poll(t0 + ms(2200)), Some(false));
    }
}
