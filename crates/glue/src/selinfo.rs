//! Poll wakeup records (`selinfo`).

use kport_hal::misc::{PollTable, WaitQueue, poll_wait};

/// Where pollers of one event wait.
#[derive(Default)]
pub struct SelInfo {
    queue: WaitQueue,
}

impl SelInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wakeups delivered so far.
    pub fn wakeups(&self) -> u64 {
        self.queue.wakeups()
    }

    /// Pollers waiting right now.
    pub fn waiters(&self) -> usize {
        self.queue.waiters()
    }
}

/// Record the current poller on `sel`; call from a poll callback.
pub fn selrecord(sel: &SelInfo, wait: &mut PollTable) {
    poll_wait(&sel.queue, wait);
}

/// Wake everyone recorded on `sel`.
pub fn selwakeup(sel: &SelInfo) {
    sel.queue.wake_up();
}

/// `selwakeuppri`; the target has no wakeup priorities.
pub fn selwakeuppri(sel: &SelInfo, _pri: i32) {
    selwakeup(sel);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_wake() {
        let sel = SelInfo::new();
        let mut a = PollTable::new();
        let mut b = PollTable::new();
        selrecord(&sel, &mut a);
        selrecord(&sel, &mut a);
        selrecord(&sel, &mut b);
        assert_eq!(sel.waiters(), 2);
        assert_eq!(a.len(), 1);
        selwakeup(&sel);
        assert_eq!(sel.wakeups(), 1);
        assert_eq!(sel.waiters(), 0);
        selwakeuppri(&sel, 0);
        assert_eq!(sel.wakeups(), 2);
    }
}
