use super::StreamNormalizer;
use chatrelay_types::Utf8Carry;

/// Hosted deltas: every chunk is already display text.
#[derive(Debug, Default)]
pub struct PassthroughNormalizer {
    utf8: Utf8Carry,
    text: String,
}

impl PassthroughNormalizer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamNormalizer for PassthroughNormalizer {
    fn feed(&mut self, chunk: &[u8]) -> String {
        self.text.push_str(&self.utf8.decode(chunk));
        self.text.clone()
    }

    fn finish(&mut self) -> String {
        self.text.push_str(&self.utf8.finish());
        self.text.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_chunks() {
        let mut n = PassthroughNormalizer::new();
        assert_eq!(n.feed(b"Hel"), "Hel");
        assert_eq!(n.feed(b"lo"), "Hello");
        assert_eq!(n.finish(), "Hello");
    }

    #[test]
    fn split_multibyte_character_is_held_back() {
        let bytes = "💬 ok".as_bytes();
        let mut n = PassthroughNormalizer::new();
        assert_eq!(n.feed(&bytes[..2]), "");
        assert_eq!(n.feed(&bytes[2..]), "💬 ok");
    }
}
