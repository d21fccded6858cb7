//! Streaming text buffer for in-progress assistant responses.
//!
//! DESIGN
//! ======
//! A response arrives as an ordered run of fragments and ends with a
//! completion signal. The buffer only appends, in arrival order, and the
//! effective text is the concatenation. It does not care where fragments come
//! from; the session feeds it `response_chunk` payloads, the CLI can feed it
//! whole strings.
//!
//! While incomplete, [`StreamingText::render`] appends a cursor glyph. Once
//! finished the buffer is frozen: the cursor never comes back and later
//! fragments are refused.

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};

use crate::clipboard::{Clipboard, ClipboardError};

/// Glyph appended to incomplete output.
pub const CURSOR: char = '▋';

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamingText {
    fragments: Vec<String>,
    complete: bool,
}

/// A code block found in the rendered markdown.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeBlock {
    /// First word of the fence info string, if any.
    pub language: Option<String>,
    /// Exact block body, as it will be copied.
    pub text: String,
}

impl StreamingText {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer holding one whole string.
    #[must_use]
    pub fn from_text(text: impl Into<String>, complete: bool) -> Self {
        Self::from_fragments([text.into()], complete)
    }

    /// Buffer holding `fragments` in the given order.
    #[must_use]
    pub fn from_fragments<I, S>(fragments: I, complete: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { fragments: fragments.into_iter().map(Into::into).collect(), complete }
    }

    /// Append one fragment. Returns `false` (and drops it) when already complete.
    pub fn push(&mut self, fragment: impl Into<String>) -> bool {
        if self.complete {
            tracing::debug!("fragment after completion dropped");
            return false;
        }
        self.fragments.push(fragment.into());
        true
    }

    /// Mark the response finished.
    pub fn finish(&mut self) {
        self.complete = true;
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Whether the in-progress indicator should be drawn.
    #[must_use]
    pub fn show_cursor(&self) -> bool {
        !self.complete
    }

    #[must_use]
    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    /// True when no text has been received. Empty fragments count as no text.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fragments.iter().all(String::is_empty)
    }

    /// Concatenated text without the cursor.
    #[must_use]
    pub fn content(&self) -> String {
        self.fragments.concat()
    }

    /// Display text: the content plus the cursor while incomplete.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = self.content();
        if self.show_cursor() {
            out.push(CURSOR);
        }
        out
    }

    /// Code blocks in the current content, in document order.
    ///
    /// An unterminated fence (common mid-stream) runs to the end of the text.
    #[must_use]
    pub fn code_blocks(&self) -> Vec<CodeBlock> {
        let content = self.content();
        let mut blocks = Vec::new();
        let mut current: Option<CodeBlock> = None;

        for event in Parser::new_ext(&content, Options::empty()) {
            match event {
                Event::Start(Tag::CodeBlock(kind)) => {
                    let language = match kind {
                        CodeBlockKind::Fenced(info) => info.split_whitespace().next().map(str::to_owned),
                        CodeBlockKind::Indented => None,
                    };
                    current = Some(CodeBlock { language, text: String::new() });
                }
                Event::Text(text) => {
                    if let Some(block) = current.as_mut() {
                        block.text.push_str(&text);
                    }
                }
                Event::End(TagEnd::CodeBlock) => {
                    if let Some(block) = current.take() {
                        blocks.push(block);
                    }
                }
                _ => {}
            }
        }
        blocks
    }

    /// Copy code block `index` to `clipboard`. The buffer is untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ClipboardError::NoSuchBlock`] for an out-of-range index, or
    /// whatever the clipboard backend reports.
    pub fn copy_code_block(&self, index: usize, clipboard: &mut dyn Clipboard) -> Result<(), ClipboardError> {
        let block = self
            .code_blocks()
            .into_iter()
            .nth(index)
            .ok_or(ClipboardError::NoSuchBlock(index))?;
        copy_code(clipboard, &block.text)
    }
}

/// Copy exact block text to `clipboard`.
///
/// # Errors
///
/// Propagates the clipboard backend error.
pub fn copy_code(clipboard: &mut dyn Clipboard, text: &str) -> Result<(), ClipboardError> {
    clipboard.write_text(text)
}

#[cfg(test)]
#[path = "stream_test.rs"]
mod tests;
