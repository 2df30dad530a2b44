//! Rope-backed low-level text store.
//!
//! This is the opaque text-run layer underneath a buffer: it owns the raw
//! character data and answers offset/line queries, and knows nothing about
//! marks, undo, or buffer metadata. All offsets are char offsets. Every
//! mutating operation reports the signed change in newline count so the
//! owning buffer can maintain its line counter without rescanning.

use anyhow::Result;
use ropey::Rope;

/// A titled text store backed by a `ropey::Rope`.
///
/// Duplication (`Clone`) is cheap — the rope shares structure — which is
/// what makes whole-store undo snapshots affordable.
#[derive(Clone)]
pub struct TextStore {
    rope: Rope,
    title: String,
}

fn newlines_in(s: &str) -> usize {
    s.bytes().filter(|&b| b == b'\n').count()
}

impl TextStore {
    /// Construct an empty store with the given external title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            rope: Rope::new(),
            title: title.into(),
        }
    }

    /// Construct a store from an in-memory string slice.
    pub fn from_str(title: impl Into<String>, content: &str) -> Result<Self> {
        Ok(Self {
            rope: Rope::from_str(content),
            title: title.into(),
        })
    }

    /// The external title (normally the buffer name).
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Change the external title.
    pub fn retitle(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    /// Total number of chars in the store.
    pub fn len_chars(&self) -> usize {
        self.rope.len_chars()
    }

    pub fn is_empty(&self) -> bool {
        self.rope.len_chars() == 0
    }

    /// Number of `'\n'` chars in the store. Buffers are normalized to end
    /// with a newline, so this equals the line count as users see it.
    pub fn newline_count(&self) -> usize {
        self.rope.len_lines() - 1
    }

    /// 0-based line containing `offset` (clamped to the end of the store).
    pub fn line_of(&self, offset: usize) -> usize {
        self.rope.char_to_line(offset.min(self.rope.len_chars()))
    }

    /// Insert `text` at char offset `at`. Returns the newline-count delta.
    pub fn insert(&mut self, at: usize, text: &str) -> isize {
        assert!(at <= self.rope.len_chars(), "insert offset out of range");
        self.rope.insert(at, text);
        newlines_in(text) as isize
    }

    /// Delete the char range `[from, to)`. Returns the newline-count delta
    /// (zero or negative).
    pub fn delete(&mut self, from: usize, to: usize) -> isize {
        assert!(
            from <= to && to <= self.rope.len_chars(),
            "delete range out of order"
        );
        let removed = self
            .rope
            .slice(from..to)
            .chars()
            .filter(|&c| c == '\n')
            .count();
        self.rope.remove(from..to);
        -(removed as isize)
    }

    /// Replace the char range `[from, to)` with `text`. Returns the
    /// newline-count delta.
    pub fn replace(&mut self, from: usize, to: usize, text: &str) -> isize {
        let removed = self.delete(from, to);
        removed + self.insert(from, text)
    }

    /// Copy the char range `[src_from, src_to)` of `src` and insert it at
    /// `at`. The source range is materialized before insertion, so `src`
    /// may be a (cheap) clone of this very store. Returns the
    /// newline-count delta.
    pub fn paste(&mut self, at: usize, src: &TextStore, src_from: usize, src_to: usize) -> isize {
        let chunk = src.slice(src_from, src_to);
        self.insert(at, &chunk)
    }

    /// Materialize the char range `[from, to)` as an owned `String`.
    pub fn slice(&self, from: usize, to: usize) -> String {
        assert!(
            from <= to && to <= self.rope.len_chars(),
            "slice range out of order"
        );
        self.rope.slice(from..to).to_string()
    }

    /// Borrowed chunks covering `[from, to)`, for streaming writes without
    /// materializing the whole range.
    pub fn chunks(&self, from: usize, to: usize) -> impl Iterator<Item = &str> {
        assert!(
            from <= to && to <= self.rope.len_chars(),
            "chunk range out of order"
        );
        self.rope.slice(from..to).chunks()
    }

    /// The char at `offset`, if in range.
    pub fn char_at(&self, offset: usize) -> Option<char> {
        if offset < self.rope.len_chars() {
            Some(self.rope.char(offset))
        } else {
            None
        }
    }
}

impl std::fmt::Debug for TextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextStore")
            .field("title", &self.title)
            .field("chars", &self.rope.len_chars())
            .field("newlines", &self.newline_count())
            .finish()
    }
}
