//! Content chunking: bounded, overlapping, boundary-aware splitting

use super::types::Chapter;
use crate::config::ChunkingConfig;
use crate::store::Metadata;
use regex::Regex;
use serde_json::json;

/// A chunk produced by the splitter, before embedding and persistence
#[derive(Debug, Clone)]
pub struct ChunkPiece {
    /// 0-based position within the document
    pub index: usize,
    pub content: String,
    /// Byte offset of the chunk start in the normalized input
    pub start_char: usize,
    /// Byte offset one past the chunk end in the normalized input
    pub end_char: usize,
    pub token_count: usize,
    pub metadata: Metadata,
}

/// Per-call splitter behavior derived from the ingestion options
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitBehavior {
    /// Markdown-aware boundary detection
    pub structural: bool,
    /// Tag chunks that contain fenced code blocks
    pub tag_code: bool,
}

/// Content chunker for splitting text into retrieval units
pub struct ContentChunker {
    config: ChunkingConfig,
    paragraph_re: Regex,
    sentence_re: Regex,
    word_re: Regex,
    heading_re: Regex,
    fence_re: Regex,
}

impl ContentChunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self {
            config,
            paragraph_re: Regex::new(r"\n[ \t]*\n+").expect("valid paragraph pattern"),
            sentence_re: Regex::new(r#"[.!?]+["')\]]*\s+"#).expect("valid sentence pattern"),
            word_re: Regex::new(r"\S+").expect("valid word pattern"),
            heading_re: Regex::new(r"(?m)^#{1,6} ").expect("valid heading pattern"),
            fence_re: Regex::new(r"(?m)^```").expect("valid fence pattern"),
        }
    }

    /// Hard cap on a chunk in bytes: the configured character cap or the
    /// model window expressed in characters, whichever is smaller.
    fn effective_cap(&self) -> usize {
        let window = self
            .config
            .max_tokens
            .saturating_mul(self.config.chars_per_token);
        self.config.max_chunk_size.min(window).max(1)
    }

    /// Token estimate used for chunk accounting
    pub fn estimate_tokens(&self, text: &str) -> usize {
        (text.len() / self.config.chars_per_token.max(1)).max(1)
    }

    /// Split normalized content into chunks.
    pub fn chunk_content(&self, content: &str, behavior: SplitBehavior) -> Vec<ChunkPiece> {
        let content = content.trim_matches(|c: char| c.is_whitespace());
        if content.is_empty() {
            return vec![];
        }

        let spans = self.emit_spans(content, behavior);

        let mut chunks = Vec::with_capacity(spans.len());
        for (index, (start, end)) in spans.into_iter().enumerate() {
            let text = &content[start..end];
            let mut metadata = Metadata::new();
            if behavior.tag_code {
                self.tag_code_metadata(text, &mut metadata);
            }
            chunks.push(ChunkPiece {
                index,
                content: text.to_string(),
                start_char: start,
                end_char: end,
                token_count: self.estimate_tokens(text),
                metadata,
            });
        }
        chunks
    }

    /// Split along a chapter list. Each chapter becomes its own chunk (or
    /// several when it exceeds the cap), carrying chapter metadata.
    pub fn chunk_chapters(&self, chapters: &[Chapter], behavior: SplitBehavior) -> Vec<ChunkPiece> {
        let mut chunks = Vec::new();

        for chapter in chapters {
            let content = chapter.content.trim();
            if content.is_empty() {
                continue;
            }

            let pieces: Vec<(usize, usize)> = if content.len() <= self.effective_cap() {
                vec![(0, content.len())]
            } else {
                self.emit_spans(content, behavior)
            };

            for (start, end) in pieces {
                let text = &content[start..end];
                let mut metadata = Metadata::new();
                metadata.insert("chunk_type".to_string(), json!("chapter"));
                metadata.insert("chapter_title".to_string(), json!(chapter.title));
                if let Some(start_time) = chapter.start_time {
                    metadata.insert("start_time".to_string(), json!(start_time));
                }
                if let Some(end_time) = chapter.end_time {
                    metadata.insert("end_time".to_string(), json!(end_time));
                }
                if behavior.tag_code {
                    self.tag_code_metadata(text, &mut metadata);
                }
                chunks.push(ChunkPiece {
                    index: chunks.len(),
                    content: text.to_string(),
                    start_char: start,
                    end_char: end,
                    token_count: self.estimate_tokens(text),
                    metadata,
                });
            }
        }

        chunks
    }

    fn tag_code_metadata(&self, text: &str, metadata: &mut Metadata) {
        if let Some(fence_pos) = text.find("```") {
            metadata.insert("has_code".to_string(), json!(true));
            let rest = &text[fence_pos + 3..];
            let language: String = rest
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
                .collect();
            if !language.is_empty() {
                metadata.insert("code_language".to_string(), json!(language));
            }
        }
    }

    /// Produce the chunk spans over `content`: accumulate boundary units up
    /// to the target size, emit, rewind by the overlap.
    fn emit_spans(&self, content: &str, behavior: SplitBehavior) -> Vec<(usize, usize)> {
        let cap = self.effective_cap();
        let target = self.config.chunk_size.min(cap).max(1);
        let units = self.boundary_units(content, target, cap, behavior);

        let mut spans: Vec<(usize, usize)> = Vec::new();
        let mut cur: Option<(usize, usize)> = None;

        for (unit_start, unit_end) in units {
            match cur {
                None => cur = Some((unit_start, unit_end)),
                Some((start, end)) => {
                    if unit_end - start <= target {
                        cur = Some((start, unit_end));
                    } else {
                        self.push_capped(&mut spans, content, start, end, cap);
                        let overlapped = self.overlap_start(content, end, start);
                        // Without an overlap the next chunk opens at the unit
                        // itself, leaving only whitespace uncovered
                        let next_start = if overlapped >= end { unit_start } else { overlapped };
                        cur = Some((next_start, unit_end));
                    }
                }
            }
        }

        if let Some((start, end)) = cur {
            self.push_capped(&mut spans, content, start, end, cap);
        }

        spans
    }

    /// Emit a span, hard-splitting anything over the cap with no overlap.
    fn push_capped(
        &self,
        spans: &mut Vec<(usize, usize)>,
        content: &str,
        start: usize,
        end: usize,
        cap: usize,
    ) {
        let mut cursor = start;
        while end - cursor > cap {
            let cut = floor_char_boundary(content, cursor + cap);
            // A cap smaller than one character cannot make progress
            if cut <= cursor {
                break;
            }
            spans.push((cursor, cut));
            cursor = cut;
        }
        if cursor < end {
            spans.push((cursor, end));
        }
    }

    /// Where the next chunk begins: `end - overlap`, snapped back to the
    /// nearest word boundary, never at or before `min_start`.
    fn overlap_start(&self, content: &str, end: usize, min_start: usize) -> usize {
        let overlap = self.config.chunk_overlap;
        if overlap == 0 || end <= overlap {
            return end;
        }
        let pos = floor_char_boundary(content, end - overlap);
        if pos <= min_start {
            return end;
        }
        // Snap back to whitespace so the overlap starts on a whole word; give
        // up after another overlap's worth of bytes without one
        let bytes = content.as_bytes();
        let limit = pos.saturating_sub(overlap).max(min_start + 1);
        let mut snapped = pos;
        while snapped > limit && !bytes[snapped - 1].is_ascii_whitespace() {
            snapped -= 1;
        }
        if snapped > min_start && bytes[snapped - 1].is_ascii_whitespace() {
            snapped
        } else {
            pos
        }
    }

    /// Boundary units no larger than the target (except indivisible words,
    /// which are bounded by the cap): paragraph > sentence > word.
    fn boundary_units(
        &self,
        content: &str,
        target: usize,
        cap: usize,
        behavior: SplitBehavior,
    ) -> Vec<(usize, usize)> {
        let paragraphs = if behavior.structural {
            self.structural_spans(content)
        } else {
            self.paragraph_spans(content)
        };

        let mut units = Vec::with_capacity(paragraphs.len());
        for (start, end) in paragraphs {
            if end - start <= target {
                units.push((start, end));
                continue;
            }
            for (s_start, s_end) in self.sentence_spans(content, start, end) {
                if s_end - s_start <= target {
                    units.push((s_start, s_end));
                    continue;
                }
                for (w_start, w_end) in self.word_spans(content, s_start, s_end) {
                    if w_end - w_start <= cap {
                        units.push((w_start, w_end));
                    } else {
                        // Indivisible run longer than the cap; pre-split it
                        let mut cursor = w_start;
                        while w_end - cursor > cap {
                            let cut = floor_char_boundary(content, cursor + cap);
                            if cut <= cursor {
                                break;
                            }
                            units.push((cursor, cut));
                            cursor = cut;
                        }
                        if cursor < w_end {
                            units.push((cursor, w_end));
                        }
                    }
                }
            }
        }
        units
    }

    /// Paragraph spans separated by blank lines.
    fn paragraph_spans(&self, content: &str) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        let mut cursor = 0;
        for sep in self.paragraph_re.find_iter(content) {
            if sep.start() > cursor {
                spans.push((cursor, sep.start()));
            }
            cursor = sep.end();
        }
        if cursor < content.len() {
            spans.push((cursor, content.len()));
        }
        spans
    }

    /// Markdown-aware spans: headings start new units and fenced code blocks
    /// stay intact as single units.
    fn structural_spans(&self, content: &str) -> Vec<(usize, usize)> {
        // Carve out fenced code blocks first so paragraph splitting never
        // cuts through them
        let mut fences: Vec<(usize, usize)> = Vec::new();
        let fence_starts: Vec<usize> = self.fence_re.find_iter(content).map(|m| m.start()).collect();
        let mut i = 0;
        while i + 1 < fence_starts.len() {
            let open = fence_starts[i];
            let close_line = fence_starts[i + 1];
            let close = content[close_line..]
                .find('\n')
                .map(|p| close_line + p + 1)
                .unwrap_or(content.len());
            fences.push((open, close));
            i += 2;
        }

        let mut spans = Vec::new();
        let mut cursor = 0;
        for &(fence_start, fence_end) in &fences {
            if fence_start > cursor {
                spans.extend(self.prose_spans(content, cursor, fence_start));
            }
            spans.push((fence_start, fence_end));
            cursor = fence_end;
        }
        if cursor < content.len() {
            spans.extend(self.prose_spans(content, cursor, content.len()));
        }

        spans
            .into_iter()
            .filter(|(s, e)| !content[*s..*e].trim().is_empty())
            .collect()
    }

    /// Prose region split on blank lines, with headings opening new units.
    fn prose_spans(&self, content: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
        let region = &content[start..end];
        let mut spans = Vec::new();
        for (p_start, p_end) in self.paragraph_spans(region) {
            let mut cursor = p_start;
            for heading in self.heading_re.find_iter(region) {
                if heading.start() > cursor && heading.start() < p_end && heading.start() > p_start
                {
                    spans.push((start + cursor, start + heading.start()));
                    cursor = heading.start();
                }
            }
            if cursor < p_end {
                spans.push((start + cursor, start + p_end));
            }
        }
        spans
    }

    /// Sentence spans within a region, including trailing separators.
    fn sentence_spans(&self, content: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
        let region = &content[start..end];
        let mut spans = Vec::new();
        let mut cursor = 0;
        for m in self.sentence_re.find_iter(region) {
            if m.end() > cursor {
                spans.push((start + cursor, start + m.end()));
                cursor = m.end();
            }
        }
        if cursor < region.len() {
            spans.push((start + cursor, end));
        }
        spans
    }

    /// Word spans within a region.
    fn word_spans(&self, content: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
        let region = &content[start..end];
        self.word_re
            .find_iter(region)
            .map(|m| (start + m.start(), start + m.end()))
            .collect()
    }
}

/// Largest char boundary at or below `index`.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut index = index;
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(chunk_size: usize, overlap: usize) -> ContentChunker {
        ContentChunker::new(ChunkingConfig {
            chunk_size,
            chunk_overlap: overlap,
            max_chunk_size: chunk_size * 2,
            max_tokens: 512,
            chars_per_token: 4,
        })
    }

    /// Strip each chunk's overlap with its predecessor and concatenate.
    /// Bytes between chunks must be pure whitespace and are re-inserted so
    /// the result compares byte-for-byte against the input.
    fn reconstruct(content: &str, chunks: &[ChunkPiece]) -> String {
        let mut out = String::new();
        let mut covered = 0usize;
        for chunk in chunks {
            if chunk.start_char > covered {
                let gap = &content[covered..chunk.start_char];
                assert!(gap.trim().is_empty(), "non-whitespace gap between chunks");
                out.push_str(gap);
                covered = chunk.start_char;
            }
            let from = chunk.start_char.max(covered);
            if from < chunk.end_char {
                out.push_str(&content[from..chunk.end_char]);
                covered = chunk.end_char;
            }
        }
        out
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunker = chunker(1000, 200);
        let chunks = chunker.chunk_content("This is a short text.", SplitBehavior::default());

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "This is a short text.");
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].start_char, 0);
        assert!(chunks[0].token_count >= 1);
    }

    #[test]
    fn test_long_text_chunks_with_overlap() {
        let chunker = chunker(50, 10);
        let text = "This is sentence one. This is sentence two. This is sentence three. This is sentence four.";
        let chunks = chunker.chunk_content(text, SplitBehavior::default());

        assert!(chunks.len() > 1, "Long text should be chunked");
        for chunk in &chunks {
            assert!(chunk.content.len() <= 100, "chunk exceeds hard cap");
            assert!(chunk.end_char >= chunk.start_char);
        }
        // Consecutive chunks overlap in the source
        for pair in chunks.windows(2) {
            assert!(pair[1].start_char < pair[0].end_char);
            assert!(pair[1].start_char > pair[0].start_char, "must make progress");
        }
    }

    #[test]
    fn test_indices_contiguous() {
        let chunker = chunker(40, 5);
        let text = "one two three four five six seven eight nine ten eleven twelve thirteen fourteen";
        let chunks = chunker.chunk_content(text, SplitBehavior::default());

        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
    }

    #[test]
    fn test_reconstruction_without_overlaps() {
        let chunker = chunker(30, 8);
        let text = "Alpha beta gamma delta. Epsilon zeta eta theta. Iota kappa lambda mu. Nu xi omicron pi.";
        let chunks = chunker.chunk_content(text, SplitBehavior::default());

        assert_eq!(reconstruct(text, &chunks), text);
    }

    #[test]
    fn test_paragraph_boundaries_preferred() {
        let chunker = chunker(30, 0);
        let text = "First paragraph here.\n\nSecond paragraph here.";
        let chunks = chunker.chunk_content(text, SplitBehavior::default());

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "First paragraph here.");
        assert_eq!(chunks[1].content, "Second paragraph here.");
    }

    #[test]
    fn test_oversized_word_hard_split() {
        let chunker = ContentChunker::new(ChunkingConfig {
            chunk_size: 10,
            chunk_overlap: 2,
            max_chunk_size: 10,
            max_tokens: 512,
            chars_per_token: 4,
        });
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = chunker.chunk_content(text, SplitBehavior::default());

        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(chunk.content.len() <= 10);
        }
        assert_eq!(reconstruct(text, &chunks), text);
    }

    #[test]
    fn test_multibyte_content_never_splits_characters() {
        let chunker = ContentChunker::new(ChunkingConfig {
            chunk_size: 10,
            chunk_overlap: 3,
            max_chunk_size: 10,
            max_tokens: 512,
            chars_per_token: 4,
        });
        let text = "héllo wörld ünïcode téxt çontent";
        let chunks = chunker.chunk_content(text, SplitBehavior::default());

        // Slicing would have panicked on a bad boundary; verify content too
        for chunk in &chunks {
            assert!(!chunk.content.is_empty());
        }
        assert_eq!(reconstruct(text, &chunks), text);
    }

    #[test]
    fn test_token_cap_bounds_chunks() {
        let chunker = ContentChunker::new(ChunkingConfig {
            chunk_size: 1000,
            chunk_overlap: 0,
            max_chunk_size: 1000,
            max_tokens: 5,
            chars_per_token: 4,
        });
        let text = "word ".repeat(50);
        let chunks = chunker.chunk_content(&text, SplitBehavior::default());

        for chunk in &chunks {
            assert!(chunk.token_count <= 5, "chunk over the token cap");
        }
    }

    #[test]
    fn test_chapter_chunks_carry_metadata() {
        let chunker = chunker(1000, 200);
        let chapters = vec![
            Chapter {
                title: "Intro".to_string(),
                start_time: Some(0.0),
                end_time: Some(65.0),
                content: "Welcome to the show.".to_string(),
            },
            Chapter {
                title: "Main topic".to_string(),
                start_time: Some(65.0),
                end_time: None,
                content: "The interesting part.".to_string(),
            },
        ];

        let chunks = chunker.chunk_chapters(&chapters, SplitBehavior::default());

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[1].index, 1);
        assert_eq!(chunks[0].metadata["chapter_title"], "Intro");
        assert_eq!(chunks[0].metadata["start_time"], 0.0);
        assert_eq!(chunks[1].metadata["chapter_title"], "Main topic");
        assert!(chunks[1].metadata.get("end_time").is_none());
    }

    #[test]
    fn test_oversized_chapter_split_keeps_metadata() {
        let chunker = ContentChunker::new(ChunkingConfig {
            chunk_size: 20,
            chunk_overlap: 0,
            max_chunk_size: 20,
            max_tokens: 512,
            chars_per_token: 4,
        });
        let chapters = vec![Chapter {
            title: "Long".to_string(),
            start_time: Some(10.0),
            end_time: None,
            content: "one two three four five six seven eight nine ten".to_string(),
        }];

        let chunks = chunker.chunk_chapters(&chapters, SplitBehavior::default());

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert_eq!(chunk.metadata["chapter_title"], "Long");
            assert!(chunk.content.len() <= 20);
        }
    }

    #[test]
    fn test_structural_keeps_code_fences_intact() {
        let chunker = chunker(60, 0);
        let text = "Intro prose before the example.\n\n```rust\nfn main() {\n    println!(\"hi\");\n}\n```\n\nClosing prose after.";
        let behavior = SplitBehavior {
            structural: true,
            tag_code: true,
        };
        let chunks = chunker.chunk_content(text, behavior);

        let code_chunk = chunks
            .iter()
            .find(|c| c.content.contains("fn main"))
            .expect("code chunk present");
        assert!(code_chunk.content.starts_with("```rust"));
        assert_eq!(code_chunk.metadata["has_code"], true);
        assert_eq!(code_chunk.metadata["code_language"], "rust");
    }

    #[test]
    fn test_structural_splits_on_headings() {
        let chunker = chunker(200, 0);
        let text = "# Title\nIntro text.\n# Second\nMore text.";
        let chunks = chunker.chunk_content(
            text,
            SplitBehavior {
                structural: true,
                tag_code: false,
            },
        );

        // Headings force unit boundaries even without blank lines; the small
        // units then re-accumulate up to the target size
        assert_eq!(chunks.len(), 1);
        let units = chunker.structural_spans(text);
        assert!(units.len() >= 2);
    }

    #[test]
    fn test_empty_and_whitespace_content() {
        let chunker = chunker(100, 10);
        assert!(chunker.chunk_content("", SplitBehavior::default()).is_empty());
        assert!(chunker
            .chunk_content("   \n\n  ", SplitBehavior::default())
            .is_empty());
    }
}
