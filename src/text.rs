//! Comment and annotation stripping for Java source text.
//!
//! The analyser needs to search declaration text for structural characters
//! (`(`, `=`, `{`) without tripping over comments or annotation arguments, so
//! the scanners here produce an [`IgnoreSet`]: per-byte flags over the text
//! marking the stretches a search should skip.

use anyhow::{Result, bail, ensure};

pub fn is_ascii_whitespace(c: u8) -> bool {
    matches!(c, b'\t' | b'\n' | b'\x0c' | b'\r' | b' ')
}

pub fn is_ascii_word(c: u8) -> bool {
    c.is_ascii_alphabetic()
}

/// Index of the first non-word byte at or after `from`, if any.
pub fn index_of_nonword(text: &str, from: usize) -> Option<usize> {
    text.bytes()
        .enumerate()
        .skip(from)
        .find(|&(_, c)| !is_ascii_word(c))
        .map(|(index, _)| index)
}

/// Index of the `close` byte matching the `open` byte at `index`,
/// accounting for nesting.
pub fn find_closing_delimiter(text: &str, index: usize, open: u8, close: u8) -> Result<usize> {
    let bytes = text.as_bytes();
    ensure!(
        bytes.get(index) == Some(&open),
        "byte at {index} should be {:?}: {text}",
        open as char
    );
    let mut level = 1usize;
    for (offset, &c) in bytes[index + 1..].iter().enumerate() {
        if c == open {
            level += 1;
        } else if c == close {
            level -= 1;
            if level == 0 {
                return Ok(index + 1 + offset);
            }
        }
    }
    bail!("unclosed delimiter at {index}: {text}")
}

/// Per-byte ignore flags over a piece of text.
#[derive(Debug, Clone)]
pub struct IgnoreSet<'t> {
    text: &'t str,
    flags: Option<Vec<bool>>,
}

impl<'t> IgnoreSet<'t> {
    fn empty(text: &'t str) -> Self {
        Self { text, flags: None }
    }

    pub fn text(&self) -> &'t str {
        self.text
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_none()
    }

    pub fn is_ignored(&self, index: usize) -> bool {
        assert!(index < self.text.len(), "index {index} out of bounds");
        self.flags.as_ref().is_some_and(|flags| flags[index])
    }

    /// Like `str::find` from an offset, but skipping matches that begin in an
    /// ignored stretch.
    pub fn ignoring_index_of(&self, needle: &str, from: usize) -> Option<usize> {
        let mut from = from;
        while from <= self.text.len() {
            let index = self.text[from..].find(needle)? + from;
            if !self.is_ignored(index) {
                return Some(index);
            }
            from = index + 1;
        }
        None
    }

    /// The text with every ignored byte removed.
    pub fn strip_ignored(&self) -> String {
        let Some(flags) = self.flags.as_ref() else {
            return self.text.to_string();
        };
        let kept: Vec<u8> = self
            .text
            .bytes()
            .zip(flags)
            .filter(|&(_, &ignored)| !ignored)
            .map(|(c, _)| c)
            .collect();
        // Ignored stretches start and end at ASCII delimiters, so the kept
        // bytes remain well-formed UTF-8.
        String::from_utf8_lossy(&kept).into_owned()
    }

    /// Merges the ignored stretches of two sets over the same text.
    pub fn union(self, other: IgnoreSet<'t>) -> IgnoreSet<'t> {
        assert_eq!(self.text, other.text, "ignore sets cover different text");
        match (self.flags, other.flags) {
            (None, flags) => IgnoreSet { text: self.text, flags },
            (flags, None) => IgnoreSet { text: self.text, flags },
            (Some(mut left), Some(right)) => {
                for (flag, other) in left.iter_mut().zip(right) {
                    *flag |= other;
                }
                IgnoreSet {
                    text: self.text,
                    flags: Some(left),
                }
            }
        }
    }
}

/// Marks every `// line` and `/* block */` comment in `text`.
///
/// Line comments run to (not including) the newline. An unterminated block
/// comment is an error.
pub fn find_comments(text: &str) -> Result<IgnoreSet<'_>> {
    let Some(mut comment_start) = next_comment_start(text, 0) else {
        return Ok(IgnoreSet::empty(text));
    };
    let mut flags = vec![false; text.len()];
    loop {
        let after = match text.as_bytes()[comment_start + 1] {
            b'/' => match text[comment_start..].find('\n') {
                Some(line_len) => comment_start + line_len,
                None => text.len(),
            },
            b'*' => match text[comment_start..].find("*/") {
                Some(end) => comment_start + end + 2,
                None => bail!("unclosed comment at {comment_start}: {text}"),
            },
            other => unreachable!("not a comment introducer: {}", other as char),
        };
        flags[comment_start..after].fill(true);
        match next_comment_start(text, after) {
            Some(next) => comment_start = next,
            None => break,
        }
    }
    Ok(IgnoreSet {
        text,
        flags: Some(flags),
    })
}

fn next_comment_start(text: &str, from: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut index = from;
    while index + 1 < bytes.len() {
        match text[index..].find('/') {
            Some(offset) => {
                let slash = index + offset;
                if matches!(bytes.get(slash + 1), Some(b'/') | Some(b'*')) {
                    return Some(slash);
                }
                index = slash + 1;
            }
            None => return None,
        }
    }
    None
}

/// Marks every `@Name` / `@Name(...)` annotation in `text`.
pub fn find_annotations(text: &str) -> Result<IgnoreSet<'_>> {
    let Some(mut annotation) = Annotation::next(text, 0)? else {
        return Ok(IgnoreSet::empty(text));
    };
    let mut flags = vec![false; text.len()];
    loop {
        flags[annotation.start..annotation.end].fill(true);
        match Annotation::next(text, annotation.end)? {
            Some(next) => annotation = next,
            None => break,
        }
    }
    Ok(IgnoreSet {
        text,
        flags: Some(flags),
    })
}

pub fn strip_comments(text: &str) -> Result<String> {
    Ok(find_comments(text)?.strip_ignored())
}

pub fn strip_annotations(text: &str) -> Result<String> {
    Ok(find_annotations(text)?.strip_ignored())
}

/// One `@Name` occurrence, spanning the `@` through the name or the closing
/// `)` of the parameter list.
#[derive(Debug, Clone, Copy)]
struct Annotation {
    start: usize,
    end: usize,
}

impl Annotation {
    fn next(text: &str, from: usize) -> Result<Option<Annotation>> {
        let mut from = from;
        while from < text.len() {
            let Some(at) = text[from..].find('@').map(|offset| from + offset) else {
                return Ok(None);
            };
            let name_end = index_of_nonword(text, at + 1).unwrap_or(text.len());
            if name_end == at + 1 {
                // A lone '@' is not an annotation.
                from = at + 1;
                continue;
            }
            if text.as_bytes().get(name_end) == Some(&b'(') {
                let params_end = find_closing_delimiter(text, name_end, b'(', b')')?;
                return Ok(Some(Annotation {
                    start: at,
                    end: params_end + 1,
                }));
            }
            return Ok(Some(Annotation {
                start: at,
                end: name_end,
            }));
        }
        Ok(None)
    }
}
