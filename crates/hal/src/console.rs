// Kernel message ring (the dmesg buffer).
// Every printk line lands here; the oldest lines are dropped once the ring
// is full.

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::IrqSafeLock;

/// Default number of lines retained.
pub const KLOG_LINES: usize = 512;

/// Global message ring.
pub static KLOG: KernelLog = KernelLog::new(KLOG_LINES);

pub struct KernelLog {
    lines: IrqSafeLock<VecDeque<String>>,
    capacity: usize,
}

impl KernelLog {
    pub const fn new(capacity: usize) -> Self {
        Self {
            lines: IrqSafeLock::new(VecDeque::new()),
            capacity,
        }
    }

    /// Append one line, evicting the oldest when full.
    pub fn push(&self, line: String) {
        if self.capacity == 0 {
            return;
        }
        let mut lines = self.lines.lock();
        while lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Copy of the retained lines, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|l| l.contains(needle))
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

pub fn _print(args: fmt::Arguments) {
    let text = alloc::fmt::format(args);
    for line in text.lines() {
        KLOG.push(String::from(line));
    }
}

#[macro_export]
macro_rules! printk {
    ($($arg:tt)*) => ($crate::console::_print(format_args!($($arg)*)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_evicts_oldest() {
        let log = KernelLog::new(2);
        log.push("a".into());
        log.push("b".into());
        log.push("c".into());
        assert_eq!(log.snapshot(), ["b", "c"]);
        assert!(!log.contains("a"));
    }

    #[test]
    fn test_printk_splits_lines() {
        printk!("console-test first\nconsole-test {}", 2);
        assert!(KLOG.contains("console-test first"));
        assert!(KLOG.contains("console-test 2"));
    }
}
