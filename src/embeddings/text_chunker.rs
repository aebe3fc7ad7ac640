//! Recursive character splitting.
//!
//! Text is split on the coarsest separator that exists in it (paragraphs,
//! then lines, then words, then characters) and the pieces are merged back
//! into windows of at most `chunk_size` characters, each window repeating
//! up to `chunk_overlap` characters from the end of the previous one.

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &SEPARATORS)
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        // First separator present in the text; "" always matches
        let (idx, separator) = separators
            .iter()
            .enumerate()
            .find(|(_, sep)| sep.is_empty() || text.contains(**sep))
            .map(|(i, sep)| (i, *sep))
            .unwrap_or((separators.len().saturating_sub(1), ""));
        let finer = &separators[(idx + 1).min(separators.len())..];

        let pieces: Vec<String> = if separator.is_empty() {
            text.chars().map(|c| c.to_string()).collect()
        } else {
            text.split(separator)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        };

        let mut chunks = Vec::new();
        let mut pending: Vec<String> = Vec::new();
        for piece in pieces {
            if char_len(&piece) <= self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                chunks.extend(self.merge(&pending, separator));
                pending.clear();
            }
            if finer.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split_with(&piece, finer));
            }
        }
        if !pending.is_empty() {
            chunks.extend(self.merge(&pending, separator));
        }
        chunks
    }

    fn merge(&self, pieces: &[String], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let joiner = |n: usize| if n > 0 { sep_len } else { 0 };
        let mut chunks = Vec::new();
        let mut window: Vec<&str> = Vec::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            if !window.is_empty() && total + len + joiner(window.len()) > self.chunk_size {
                push_chunk(&mut chunks, &window.join(separator));
                // Keep a tail of the window as overlap for the next chunk
                while total > self.chunk_overlap
                    || (total > 0 && total + len + joiner(window.len()) > self.chunk_size)
                {
                    let removed = window.remove(0);
                    total -= char_len(removed) + joiner(window.len());
                }
            }
            window.push(piece);
            total += len + joiner(window.len() - 1);
        }
        if !window.is_empty() {
            push_chunk(&mut chunks, &window.join(separator));
        }
        chunks
    }
}

fn push_chunk(chunks: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunker = TextChunker::new(100, 20);
        assert_eq!(chunker.split("Hello world"), vec!["Hello world"]);
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        let chunker = TextChunker::new(100, 20);
        assert!(chunker.split("   \n\n ").is_empty());
    }

    #[test]
    fn test_chunks_respect_size() {
        let text = (0..300).map(|i| format!("word{}", i)).collect::<Vec<_>>().join(" ");
        let chunker = TextChunker::new(100, 20);
        let chunks = chunker.split(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 100, "chunk too long: {}", chunk.len());
        }
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let text = (0..100).map(|i| format!("w{:03}", i)).collect::<Vec<_>>().join(" ");
        let chunker = TextChunker::new(50, 15);
        let chunks = chunker.split(&text);
        for pair in chunks.windows(2) {
            let last_word = pair[0].split(' ').last().unwrap();
            assert!(pair[1].contains(last_word), "{:?} / {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_paragraphs_split_first() {
        let para = "a".repeat(30);
        let text = format!("{}\n\n{}\n\n{}", para, para, para);
        let chunker = TextChunker::new(40, 0);
        assert_eq!(chunker.split(&text), vec![para.clone(), para.clone(), para]);
    }

    #[test]
    fn test_unbroken_text_falls_back_to_characters() {
        let text = "x".repeat(95);
        let chunker = TextChunker::new(40, 10);
        let chunks = chunker.split(&text);
        assert!(chunks.len() >= 3);
        assert_eq!(chunks[0].len(), 40);
    }
}
