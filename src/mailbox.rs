//! Single-slot, latest-wins exchange between a producer and its readers.
//!
//! A [`Mailbox`] holds at most one value. The producer overwrites the slot
//! with [`publish`](Mailbox::publish); readers take a shared reference to the
//! current content with [`peek`](Mailbox::peek). Neither side blocks or
//! locks: the slot is an atomically swapped `Arc`, so a reader sees either the
//! previous value or a completely published new one.
//!
//! # Update semantics
//!
//! - **Latest-wins**: values published between two reads are lost except the
//!   last one.
//! - **Sticky**: reading does not remove the value, and once something has
//!   been published the slot is never empty again.
//!
//! # Example
//!
//! ```
//! use r2000_scan::mailbox::Mailbox;
//!
//! let mailbox = Mailbox::new();
//! assert!(mailbox.peek().is_none());
//!
//! mailbox.publish(1);
//! mailbox.publish(2);
//! assert_eq!(mailbox.peek().as_deref(), Some(&2));
//! assert_eq!(mailbox.peek().as_deref(), Some(&2));
//! ```

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::types::Scan;

/// Mailbox carrying the most recent complete scan of a session.
pub type ScanMailbox = Mailbox<Scan>;

/// Lock-free single-slot mailbox.
pub struct Mailbox<T> {
    slot: ArcSwapOption<T>,
}

impl<T> Mailbox<T> {
    /// Creates an empty mailbox.
    pub fn new() -> Self {
        Self {
            slot: ArcSwapOption::empty(),
        }
    }

    /// Replace the content of the slot.
    ///
    /// Never blocks and never fails. Unread content is discarded.
    pub fn publish(&self, value: T) {
        self.publish_arc(Arc::new(value));
    }

    /// Replace the content of the slot with an already shared value.
    pub fn publish_arc(&self, value: Arc<T>) {
        self.slot.store(Some(value));
    }

    /// Returns the current content without removing it.
    pub fn peek(&self) -> Option<Arc<T>> {
        self.slot.load_full()
    }

    /// Returns true once a value has been published.
    pub fn has_value(&self) -> bool {
        self.slot.load().is_some()
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("slot", &self.peek())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_empty_until_first_publish() {
        let mailbox: Mailbox<u32> = Mailbox::new();
        assert!(mailbox.peek().is_none());
        assert!(!mailbox.has_value());

        mailbox.publish(7);
        assert!(mailbox.has_value());
        assert_eq!(mailbox.peek().as_deref(), Some(&7));
    }

    #[test]
    fn test_latest_wins() {
        let mailbox = Mailbox::new();
        for i in 0..10 {
            mailbox.publish(i);
        }
        assert_eq!(mailbox.peek().as_deref(), Some(&9));
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mailbox = Mailbox::new();
        mailbox.publish("scan");
        let first = mailbox.peek().unwrap();
        let second = mailbox.peek().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_reader_keeps_old_value_alive() {
        let mailbox = Mailbox::new();
        mailbox.publish(vec![1, 2, 3]);
        let held = mailbox.peek().unwrap();
        mailbox.publish(vec![4]);
        assert_eq!(*held, vec![1, 2, 3]);
        assert_eq!(mailbox.peek().as_deref(), Some(&vec![4]));
    }

    /// Every published value is a vector filled with a single repeated
    /// number. A reader that ever sees mixed numbers has observed a torn
    /// value.
    #[test]
    fn test_concurrent_readers_never_see_torn_values() {
        const LEN: usize = 512;
        let mailbox = Arc::new(Mailbox::new());
        let done = Arc::new(AtomicBool::new(false));

        let producer = {
            let mailbox = Arc::clone(&mailbox);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for round in 0..5_000u32 {
                    mailbox.publish(vec![round; LEN]);
                }
                done.store(true, Ordering::Release);
            })
        };

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let mailbox = Arc::clone(&mailbox);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let mut seen_value = false;
                    let mut last_round = 0u32;
                    while !done.load(Ordering::Acquire) {
                        match mailbox.peek() {
                            Some(value) => {
                                seen_value = true;
                                assert_eq!(value.len(), LEN);
                                let round = value[0];
                                assert!(value.iter().all(|&v| v == round));
                                assert!(round >= last_round);
                                last_round = round;
                            }
                            // Once published, the slot never becomes empty.
                            None => assert!(!seen_value),
                        }
                    }
                })
            })
            .collect();

        producer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(mailbox.peek().unwrap()[0], 4_999);
    }
}
