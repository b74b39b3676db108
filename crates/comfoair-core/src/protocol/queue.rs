//! FIFO of commands waiting for the line to become free

use std::collections::VecDeque;

/// A command waiting to be transmitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedCommand {
    /// Descriptor label, for logging
    pub label: String,
    /// Request id
    pub command: u16,
    /// Unstuffed request payload
    pub payload: Vec<u8>,
}

impl QueuedCommand {
    /// Command to send later
    pub fn new(label: impl Into<String>, command: u16, payload: Vec<u8>) -> Self {
        Self {
            label: label.into(),
            command,
            payload,
        }
    }
}

/// Ordered backlog of commands
///
/// Duplicates are allowed; a poll group that fires twice before the line is
/// free gets sent twice.
#[derive(Debug, Default)]
pub struct CommandQueue {
    items: VecDeque<QueuedCommand>,
}

impl CommandQueue {
    /// Empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail
    pub fn enqueue(&mut self, command: QueuedCommand) {
        self.items.push_back(command);
    }

    /// Remove the head
    pub fn pop(&mut self) -> Option<QueuedCommand> {
        self.items.pop_front()
    }

    /// Peek at the head
    pub fn front(&self) -> Option<&QueuedCommand> {
        self.items.front()
    }

    /// Number of waiting commands
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop every queued command
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Queued commands, head first
    pub fn iter(&self) -> impl Iterator<Item = &QueuedCommand> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = CommandQueue::new();
        queue.enqueue(QueuedCommand::new("temperatures", 0x00D1, vec![]));
        queue.enqueue(QueuedCommand::new("bypass", 0x00DF, vec![]));
        queue.enqueue(QueuedCommand::new("temperatures", 0x00D1, vec![]));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.front().unwrap().command, 0x00D1);
        let order: Vec<u16> = std::iter::from_fn(|| queue.pop()).map(|c| c.command).collect();
        assert_eq!(order, vec![0x00D1, 0x00DF, 0x00D1]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_payload_kept() {
        let mut queue = CommandQueue::new();
        queue.enqueue(QueuedCommand::new("set_ventilation_level", 0x0099, vec![3]));
        assert_eq!(queue.pop().unwrap().payload, vec![3]);
        assert_eq!(queue.pop(), None);
    }
}
