use super::StreamNormalizer;
use chatrelay_types::Utf8Carry;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Line {
    message: LineMessage,
}

#[derive(Debug, Deserialize)]
struct LineMessage {
    #[serde(default)]
    content: Option<String>,
}

/// `{"message":{"content":..}}` records, one per line.
///
/// Each line is prefixed with the carry-over from the previous failed parse.
/// A parse failure is always treated as an incomplete record, so the whole
/// current line becomes the new carry-over. A genuinely malformed line is
/// therefore never dropped; it prefixes every later line until the stream
/// ends.
#[derive(Debug, Default)]
pub struct LineCarryNormalizer {
    utf8: Utf8Carry,
    carry: String,
    text: String,
}

impl LineCarryNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text waiting to be completed by the next chunk.
    pub fn carry(&self) -> &str {
        &self.carry
    }

    fn consume(&mut self, chunk: &str) {
        for line in chunk.trim_end_matches(['\r', '\n']).split('\n') {
            let current = format!("{}{line}", self.carry);
            match serde_json::from_str::<Line>(&current) {
                Ok(parsed) => {
                    self.carry.clear();
                    if let Some(content) = parsed.message.content {
                        self.text.push_str(&content);
                    }
                }
                Err(_) => {
                    tracing::trace!(carry = %current, "line incomplete, carrying over");
                    self.carry = current;
                }
            }
        }
    }
}

impl StreamNormalizer for LineCarryNormalizer {
    fn feed(&mut self, chunk: &[u8]) -> String {
        let decoded = self.utf8.decode(chunk);
        if !decoded.is_empty() {
            self.consume(&decoded);
        }
        self.text.clone()
    }

    fn finish(&mut self) -> String {
        let rest = self.utf8.finish();
        if !rest.is_empty() {
            self.consume(&rest);
        }
        if !self.carry.is_empty() {
            tracing::debug!(carry = %self.carry, "stream ended with an incomplete line");
        }
        self.text.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &str = r#"{"message":{"content":"hi"}}"#;

    #[test]
    fn whole_record() {
        let mut n = LineCarryNormalizer::new();
        assert_eq!(n.feed(RECORD.as_bytes()), "hi");
        assert!(n.carry().is_empty());
    }

    #[test]
    fn split_at_every_offset_matches_whole() {
        for split in 1..RECORD.len() {
            let mut n = LineCarryNormalizer::new();
            n.feed(RECORD[..split].as_bytes());
            assert_eq!(n.feed(RECORD[split..].as_bytes()), "hi", "split at {split}");
        }
    }

    #[test]
    fn several_lines_in_one_chunk() {
        let mut n = LineCarryNormalizer::new();
        let chunk = "{\"message\":{\"content\":\"a\"}}\n{\"message\":{\"content\":\"b\"}}\n";
        assert_eq!(n.feed(chunk.as_bytes()), "ab");
    }

    #[test]
    fn malformed_line_poisons_later_lines() {
        let mut n = LineCarryNormalizer::new();
        n.feed(b"garbage\n");
        assert_eq!(n.feed(RECORD.as_bytes()), "");
        assert_eq!(n.carry(), format!("garbage{RECORD}"));
    }

    #[test]
    fn whitespace_inside_content_survives_a_split() {
        let record = r#"{"message":{"content":"hi there"}}"#;
        let split = record.find("there").unwrap();
        let mut n = LineCarryNormalizer::new();
        n.feed(record[..split].as_bytes());
        assert_eq!(n.feed(record[split..].as_bytes()), "hi there");
    }
}
