use std::collections::VecDeque;

use teloxide::types::{MessageId, UserId};

const BUFFER_CAPACITY: usize = 50;

/// Per-user bounded FIFO of recent media-message references (§3 secondary
/// entity). The shipping command surface uses reply-scan (`scanner.rs`), not
/// this buffer, for `/leech` — see §12 Open Question 2. `Buffer` survives
/// narrowly to back the one real input the reply-scan mode can't validate on
/// its own: a `/leech` issued without a reply, which must be rejected
/// outright rather than serviced from a FIFO nothing else populates.
#[derive(Debug, Default)]
pub struct Buffer {
    entries: VecDeque<(UserId, MessageId)>,
}

impl Buffer {
    pub fn new() -> Self {
        Buffer { entries: VecDeque::new() }
    }

    pub fn push(&mut self, user: UserId, message_id: MessageId) {
        if self.entries.len() == BUFFER_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back((user, message_id));
    }

    /// True when `user` has sent media since the buffer was last drained —
    /// used only to distinguish "no reply and nothing recent either" (a
    /// clear-error rejection) from "no reply but files were just sent"
    /// (still rejected today, since reply-scan is the shipping mode, but
    /// kept distinguishable for a future buffer-mode toggle).
    pub fn has_recent(&self, user: UserId) -> bool {
        self.entries.iter().any(|(u, _)| *u == user)
    }

    pub fn peek_latest(&self, user: UserId) -> Option<MessageId> {
        self.entries.iter().rev().find(|(u, _)| *u == user).map(|(_, id)| *id)
    }

    pub fn drain_for(&mut self, user: UserId) -> Vec<MessageId> {
        let (matching, rest): (VecDeque<_>, VecDeque<_>) = self.entries.drain(..).partition(|(u, _)| *u == user);
        self.entries = rest;
        matching.into_iter().map(|(_, id)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_bounded_by_eviction_of_oldest_entry() {
        let mut buffer = Buffer::new();
        for i in 0..BUFFER_CAPACITY + 5 {
            buffer.push(UserId(1), MessageId(i as i32));
        }
        assert_eq!(buffer.entries.len(), BUFFER_CAPACITY);
        assert_eq!(buffer.entries.front().unwrap().1, MessageId(5));
    }

    #[test]
    fn has_recent_is_false_for_a_user_with_no_entries() {
        let mut buffer = Buffer::new();
        buffer.push(UserId(1), MessageId(10));
        assert!(buffer.has_recent(UserId(1)));
        assert!(!buffer.has_recent(UserId(2)));
    }

    #[test]
    fn drain_for_removes_only_the_matching_users_entries() {
        let mut buffer = Buffer::new();
        buffer.push(UserId(1), MessageId(1));
        buffer.push(UserId(2), MessageId(2));
        buffer.push(UserId(1), MessageId(3));

        let drained = buffer.drain_for(UserId(1));
        assert_eq!(drained, vec![MessageId(1), MessageId(3)]);
        assert!(!buffer.has_recent(UserId(1)));
        assert!(buffer.has_recent(UserId(2)));
    }
}
