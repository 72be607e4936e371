//! Tokenizes a capability string into top-level `tag(value)` entries.
//!
//! A capability string is one big parenthesized group
//! (`(prot(monitor)type(lcd)...vcp(10 12 14(05 08 0b) 16)mccs_ver(2.1))`);
//! the outer parens are stripped once, then entries are split by walking
//! paired parens so a nested list like `vcp(...)`'s own parentheses don't
//! terminate the entry early.

use nom::error::{Error as NomError, ErrorKind};
use nom::IResult;

use super::{OResultI, Value};

fn is_tag_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn parse_tag(i: &[u8]) -> IResult<&[u8], &str> {
    let end = i.iter().position(|&b| !is_tag_char(b)).unwrap_or(i.len());
    if end == 0 {
        return Err(nom::Err::Error(NomError::new(i, ErrorKind::AlphaNumeric)));
    }
    let (tag, rest) = i.split_at(end);
    // tags are always ASCII, guaranteed by `is_tag_char`.
    Ok((rest, std::str::from_utf8(tag).expect("tag bytes are ascii")))
}

/// Split off the parenthesized value following a tag, matching nested
/// parens so a `vcp(... 14(05 08) ...)` entry isn't cut short.
fn balanced_parens(i: &[u8]) -> IResult<&[u8], &[u8]> {
    if i.first() != Some(&b'(') {
        return Err(nom::Err::Error(NomError::new(i, ErrorKind::Char)));
    }
    let mut depth = 0i32;
    for (idx, &b) in i.iter().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&i[idx + 1..], &i[1..idx]));
                }
            }
            _ => {}
        }
    }
    Err(nom::Err::Error(NomError::new(i, ErrorKind::Eof)))
}

fn parse_one_entry(i: &[u8]) -> IResult<&[u8], Value<'_>> {
    let (i, tag) = parse_tag(i)?;
    let (i, value) = balanced_parens(i)?;
    Ok((i, Value::String { tag, value }))
}

fn skip_whitespace(i: &[u8]) -> &[u8] {
    let start = i
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(i.len());
    &i[start..]
}

impl<'i> Value<'i> {
    pub(super) fn parse_nom(
        i: &'i [u8],
        _ctx: Option<()>,
    ) -> IResult<&'i [u8], Value<'i>> {
        parse_one_entry(skip_whitespace(i))
    }
}

/// Iterator over the top-level entries of a capability string; yielded by
/// [`Value::parse_capabilities`](super::Value::parse_capabilities).
#[derive(Debug, Clone, Copy)]
pub struct ValueParser<'i> {
    remaining: &'i [u8],
}

impl<'i> ValueParser<'i> {
    pub(crate) fn new(capability_string: &'i [u8]) -> Self {
        let trimmed = skip_whitespace(capability_string);
        let inner = if trimmed.first() == Some(&b'(') && trimmed.last() == Some(&b')') {
            &trimmed[1..trimmed.len() - 1]
        } else {
            trimmed
        };
        Self { remaining: inner }
    }

    /// Consume the parser, yielding one parsed [`Value`] (or parse error)
    /// per top-level entry.
    pub(crate) fn nom_iter(self) -> impl Iterator<Item = OResultI<'i, Value<'i>>> {
        EntryIter {
            remaining: self.remaining,
        }
    }
}

struct EntryIter<'i> {
    remaining: &'i [u8],
}

impl<'i> Iterator for EntryIter<'i> {
    type Item = OResultI<'i, Value<'i>>;

    fn next(&mut self) -> Option<Self::Item> {
        let i = skip_whitespace(self.remaining);
        if i.is_empty() {
            return None;
        }
        match Value::parse_nom(i, None) {
            Ok((rest, value)) => {
                self.remaining = rest;
                Some(Ok(value))
            }
            Err(err) => {
                self.remaining = &[];
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn splits_simple_entries() {
        let parser = ValueParser::new(b"(prot(monitor)type(lcd))");
        let entries: Vec<_> = parser.nom_iter().collect::<Result<_, _>>().unwrap();
        assert_eq!(
            entries,
            vec![
                Value::String {
                    tag: "prot",
                    value: b"monitor"
                },
                Value::String {
                    tag: "type",
                    value: b"lcd"
                },
            ]
        );
    }

    #[test]
    fn nested_parens_stay_with_their_entry() {
        let parser = ValueParser::new(b"(vcp(10 14(05 08 0b) 16)mccs_ver(2.1))");
        let entries: Vec<_> = parser.nom_iter().collect::<Result<_, _>>().unwrap();
        assert_eq!(
            entries,
            vec![
                Value::String {
                    tag: "vcp",
                    value: b"10 14(05 08 0b) 16"
                },
                Value::String {
                    tag: "mccs_ver",
                    value: b"2.1"
                },
            ]
        );
    }
}
