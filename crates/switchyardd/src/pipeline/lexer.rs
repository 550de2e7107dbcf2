//! Minimal source splitter separating code from literals and comments.
//!
//! Both the legacy rewrite and the import scanner must leave string contents
//! and comments untouched, so they operate on [`Segment::Code`] runs only.

/// A contiguous run of script source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Segment<'a> {
    /// Executable code.
    Code(&'a str),
    /// A string or character literal, quotes included.
    Literal(&'a str),
    /// A line or block comment.
    Comment(&'a str),
}

impl<'a> Segment<'a> {
    pub(crate) const fn text(&self) -> &'a str {
        match self {
            Self::Code(text) | Self::Literal(text) | Self::Comment(text) => text,
        }
    }
}

/// Splits `source` into code, literal and comment segments.
///
/// Unterminated literals and comments extend to the end of the input.
pub(crate) fn segments(source: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = source.char_indices().peekable();

    while let Some((index, ch)) = chars.next() {
        let next = chars.peek().map(|(_, next)| *next);
        let end = match (ch, next) {
            ('/', Some('/')) => line_end(source, index),
            ('/', Some('*')) => block_end(source, index),
            ('"' | '\'' | '`', _) => literal_end(source, index, ch),
            _ => continue,
        };

        push_code(&mut out, source, start, index);
        if let Some(text) = source.get(index..end) {
            if ch == '/' {
                out.push(Segment::Comment(text));
            } else {
                out.push(Segment::Literal(text));
            }
        }
        start = end;
        while chars.next_if(|(position, _)| *position < end).is_some() {}
    }

    push_code(&mut out, source, start, source.len());
    out
}

fn push_code<'a>(out: &mut Vec<Segment<'a>>, source: &'a str, start: usize, end: usize) {
    if let Some(text) = source.get(start..end)
        && !text.is_empty()
    {
        out.push(Segment::Code(text));
    }
}

fn line_end(source: &str, index: usize) -> usize {
    source
        .get(index..)
        .and_then(|rest| rest.find('\n'))
        .map_or(source.len(), |offset| index + offset)
}

fn block_end(source: &str, index: usize) -> usize {
    source
        .get(index + 2..)
        .and_then(|rest| rest.find("*/"))
        .map_or(source.len(), |offset| index + 2 + offset + 2)
}

fn literal_end(source: &str, index: usize, quote: char) -> usize {
    let Some(rest) = source.get(index + quote.len_utf8()..) else {
        return source.len();
    };
    let mut escaped = false;
    for (offset, ch) in rest.char_indices() {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == quote {
            return index + quote.len_utf8() + offset + ch.len_utf8();
        }
    }
    source.len()
}

/// Characters that may continue an identifier.
pub(crate) fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$'
}

/// Characters that may start an identifier.
pub(crate) fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_' || ch == '$'
}
