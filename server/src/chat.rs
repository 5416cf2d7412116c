//! Console chat log

use dungeon_shared::SERVER_NICK;
use log::info;
use std::collections::VecDeque;
use std::time::SystemTime;

pub const DEFAULT_CHAT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub nick: String,
    pub message: String,
    pub timestamp: SystemTime,
}

/// Most recent chat lines, oldest dropped first
#[derive(Debug)]
pub struct ChatLog {
    messages: VecDeque<ChatMessage>,
    capacity: usize,
}

impl ChatLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity.min(DEFAULT_CHAT_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, nick: impl Into<String>, message: impl Into<String>) {
        let entry = ChatMessage {
            nick: nick.into(),
            message: message.into(),
            timestamp: SystemTime::now(),
        };
        info!("{}: {}", entry.nick, entry.message);
        if self.messages.len() == self.capacity {
            self.messages.pop_front();
        }
        self.messages.push_back(entry);
    }

    /// Adds a line on behalf of the server itself
    pub fn server_info(&mut self, message: impl Into<String>) {
        self.push(SERVER_NICK, message);
    }

    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::new(DEFAULT_CHAT_CAPACITY)
    }
}
