//! Token to sentence segmentation.
//!
//! A maximal run of terminal marks (`.`, `!`, `?` and their full-width forms)
//! closes a sentence when it ends the buffer at a fragment boundary, or when
//! the next character is not an ASCII letter or digit. The second rule keeps
//! `3.14` and `example.com` whole when they arrive inside one fragment.

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '。' | '！' | '？')
}

#[derive(Debug, Default)]
pub struct SentenceAssembler {
    buffer: String,
}

impl SentenceAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment; returns the sentences it completed, in order.
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        self.buffer.push_str(fragment);

        let mut sentences = Vec::new();
        while let Some(end) = self.next_boundary() {
            let sentence: String = self.buffer.drain(..end).collect();
            let trimmed = sentence.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
        }
        sentences
    }

    /// Flush what is left once the token stream ends.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let trimmed = rest.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    /// Byte offset just past the first sentence-closing run of marks.
    fn next_boundary(&self) -> Option<usize> {
        let mut chars = self.buffer.char_indices().peekable();
        while let Some((_, c)) = chars.next() {
            if !is_terminal(c) {
                continue;
            }
            while chars.peek().is_some_and(|&(_, next)| is_terminal(next)) {
                chars.next();
            }
            match chars.peek() {
                None => return Some(self.buffer.len()),
                Some(&(idx, next)) if !next.is_ascii_alphanumeric() => return Some(idx),
                Some(_) => {}
            }
        }
        None
    }
}
