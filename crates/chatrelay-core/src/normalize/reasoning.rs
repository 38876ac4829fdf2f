use super::StreamNormalizer;
use chatrelay_types::{Utf8Carry, truncate_str};
use serde::Deserialize;

/// Reasoning value marking the end of the reasoning channel. Reasoning
/// records after it are ignored.
pub const REASONING_SENTINEL: &str = "content is null";

#[derive(Debug, Deserialize)]
struct Record {
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// Render reasoning and answer text the way the chat UI displays them.
pub fn render_reasoning(reasoning: &str, content: &str) -> String {
    if reasoning.is_empty() {
        content.to_string()
    } else {
        format!("<think>\n{reasoning}\n</think>\n\n{content}")
    }
}

/// Dual-channel reasoning/content records, one JSON object per line.
///
/// A line split across chunks is completed by the next chunk. A terminated
/// line that is not a valid record is skipped with a warning, and so is a
/// held-over fragment when the next chunk is a whole record on its own.
#[derive(Debug, Default)]
pub struct ReasoningNormalizer {
    utf8: Utf8Carry,
    partial: String,
    reasoning: String,
    content: String,
    reasoning_ended: bool,
}

impl ReasoningNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    fn apply(&mut self, record: Record) {
        if let Some(reasoning) = record.reasoning_content {
            if reasoning == REASONING_SENTINEL {
                self.reasoning_ended = true;
            } else if !self.reasoning_ended {
                self.reasoning.push_str(&reasoning);
            }
        }
        if let Some(content) = record.content {
            self.content.push_str(&content);
        }
    }

    fn apply_line(&mut self, line: &str, stale: usize) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }
        match serde_json::from_str::<Record>(trimmed) {
            Ok(record) => self.apply(record),
            Err(e) => match recover_fresh(line, stale) {
                Some(record) => self.apply(record),
                None => tracing::warn!(
                    "Skipping invalid reasoning record ({e}): {}",
                    truncate_str(trimmed, 200)
                ),
            },
        }
    }

    fn render(&self) -> String {
        render_reasoning(&self.reasoning, &self.content)
    }
}

/// Parse the text after a stale `stale`-byte prefix that never became a
/// record, warning about the prefix when the remainder is one.
fn recover_fresh(text: &str, stale: usize) -> Option<Record> {
    if stale == 0 {
        return None;
    }
    let (prefix, fresh) = (text.get(..stale)?, text.get(stale..)?);
    let record = serde_json::from_str::<Record>(fresh.trim()).ok()?;
    tracing::warn!(
        "Dropping unparseable reasoning fragment: {}",
        truncate_str(prefix.trim(), 200)
    );
    Some(record)
}

impl StreamNormalizer for ReasoningNormalizer {
    fn feed(&mut self, chunk: &[u8]) -> String {
        let text = self.utf8.decode(chunk);
        // Bytes held over from earlier chunks; only the first line can start with them.
        let mut stale = self.partial.len();
        self.partial.push_str(&text);

        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            self.apply_line(&line, stale);
            stale = 0;
        }

        // An unterminated tail is consumed as soon as it is a whole record,
        // or as soon as this chunk alone is one.
        let tail = self.partial.trim();
        if tail.is_empty() {
            self.partial.clear();
        } else if let Ok(record) = serde_json::from_str::<Record>(tail) {
            self.partial.clear();
            self.apply(record);
        } else if let Some(record) = recover_fresh(&self.partial, stale) {
            self.partial.clear();
            self.apply(record);
        }

        self.render()
    }

    fn finish(&mut self) -> String {
        let mut rest = std::mem::take(&mut self.partial);
        rest.push_str(&self.utf8.finish());
        self.apply_line(&rest, 0);
        self.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasoning_then_sentinel_then_content() {
        let mut n = ReasoningNormalizer::new();
        assert_eq!(n.feed(br#"{"reasoning_content":"a"}"#), "<think>\na\n</think>\n\n");
        n.feed(br#"{"reasoning_content":"content is null"}"#);
        assert_eq!(
            n.feed(br#"{"content":"b"}"#),
            "<think>\na\n</think>\n\nb"
        );
    }

    #[test]
    fn reasoning_after_sentinel_is_ignored() {
        let mut n = ReasoningNormalizer::new();
        n.feed(b"{\"reasoning_content\":\"a\"}\n{\"reasoning_content\":\"content is null\"}\n");
        n.feed(b"{\"reasoning_content\":\"late\"}\n{\"content\":\"b\"}\n");
        assert_eq!(n.reasoning(), "a");
        assert_eq!(n.finish(), "<think>\na\n</think>\n\nb");
    }

    #[test]
    fn content_only_has_no_think_block() {
        let mut n = ReasoningNormalizer::new();
        assert_eq!(n.feed(b"{\"content\":\"plain\"}\n"), "plain");
    }

    #[test]
    fn malformed_line_is_skipped() {
        let mut n = ReasoningNormalizer::new();
        let text = n.feed(b"{\"content\":\"a\"}\nnot json\n{\"content\":\"b\"}\n");
        assert_eq!(text, "ab");
    }

    #[test]
    fn record_split_across_chunks() {
        let mut n = ReasoningNormalizer::new();
        assert_eq!(n.feed(br#"{"reasoning_content":"th"#), "");
        assert_eq!(n.feed(b"ink\"}\n{\"content\":"), "<think>\nthink\n</think>\n\n");
        assert_eq!(n.feed(b"\"ok\"}\n"), "<think>\nthink\n</think>\n\nok");
    }

    #[test]
    fn keep_alive_spaces_are_ignored() {
        let mut n = ReasoningNormalizer::new();
        n.feed(b" ");
        n.feed(b"{\"content\":\"x\"}\n");
        n.feed(b" ");
        assert_eq!(n.finish(), "x");
    }

    #[test]
    fn stale_fragment_does_not_swallow_next_record() {
        let mut n = ReasoningNormalizer::new();
        assert_eq!(n.feed(b"not json"), "");
        assert_eq!(n.feed(br#"{"content":"b"}"#), "b");
        assert_eq!(n.feed(br#"{"content":"c"}"#), "bc");
        assert_eq!(n.finish(), "bc");
    }

    #[test]
    fn stale_fragment_before_terminated_record_is_dropped() {
        let mut n = ReasoningNormalizer::new();
        n.feed(b"{\"content\":");
        assert_eq!(n.feed(b"{\"content\":\"b\"}\n"), "b");
    }

    #[test]
    fn unfinished_tail_is_dropped_at_end() {
        let mut n = ReasoningNormalizer::new();
        n.feed(b"{\"content\":\"x\"}\n{\"content\":");
        assert_eq!(n.finish(), "x");
    }
}
