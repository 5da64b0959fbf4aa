use std::collections::VecDeque;

/// FIFO of messages bounded by their total byte size.
#[derive(Debug)]
pub struct MessageQueue {
    messages: VecDeque<Vec<u8>>,
    total_bytes: usize,
    max_bytes: usize,
}

impl MessageQueue {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            total_bytes: 0,
            max_bytes,
        }
    }

    /// Appends a message, then drops from the front until the byte total fits again.
    /// Returns how many messages were evicted.
    pub fn push(&mut self, message: Vec<u8>) -> u64 {
        self.total_bytes += message.len();
        self.messages.push_back(message);

        let mut evicted = 0;
        while self.total_bytes > self.max_bytes {
            let Some(oldest) = self.messages.pop_front() else {
                break;
            };
            self.total_bytes -= oldest.len();
            evicted += 1;
        }
        evicted
    }

    pub fn front(&self) -> Option<&[u8]> {
        self.messages.front().map(Vec::as_slice)
    }

    pub fn pop_front(&mut self) -> Option<Vec<u8>> {
        let message = self.messages.pop_front()?;
        self.total_bytes -= message.len();
        Some(message)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.total_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }
}
