use std::borrow::Cow;

// Leading id byte of a chat line. Must stay outside the transport's 0x60..=0x7f range.
pub const CHAT: u8 = 0x01;

pub fn encode(text: &str) -> Vec<u8> {
    let mut message = Vec::with_capacity(text.len() + 1);
    message.push(CHAT);
    message.extend_from_slice(text.as_bytes());
    message
}

pub fn decode(message: &[u8]) -> Option<Cow<'_, str>> {
    match message.split_first() {
        Some((&CHAT, text)) => Some(String::from_utf8_lossy(text)),
        _ => None,
    }
}

pub fn is_chat(message: &[u8]) -> bool {
    message.first() == Some(&CHAT)
}
