//! Partial typed values from incomplete JSON.

use crate::error::Result;
use crate::generate::Generation;
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Value,
    Key,
    Colon,
    CommaOrClose,
}

/// Close an incomplete JSON document.
///
/// Open strings and containers are closed; a dangling key, separator or
/// unfinished literal is cut off. Returns `None` until at least one value
/// has started, or for text that is not a JSON prefix at all.
pub fn repair_json(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut closers: Vec<u8> = Vec::new();
    let mut expect = Expect::Value;
    let mut has_value = false;
    // (end offset, closers, whether a value had started)
    let mut checkpoint: Option<(usize, Vec<u8>, bool)> = None;

    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        match expect {
            Expect::Value => match b {
                b'{' | b'[' => {
                    if !closers.is_empty() {
                        has_value = true;
                    }
                    closers.push(if b == b'{' { b'}' } else { b']' });
                    expect = if b == b'{' { Expect::Key } else { Expect::Value };
                    i += 1;
                    checkpoint = Some((i, closers.clone(), has_value));
                }
                b']' if closers.last() == Some(&b']') => {
                    closers.pop();
                    i += 1;
                    if closers.is_empty() {
                        checkpoint = Some((i, closers.clone(), true));
                        break;
                    }
                    expect = Expect::CommaOrClose;
                    checkpoint = Some((i, closers.clone(), has_value));
                }
                b'"' => match string_end(bytes, i + 1) {
                    Some(end) => {
                        i = end;
                        has_value = true;
                        checkpoint = Some((i, closers.clone(), true));
                        if closers.is_empty() {
                            break;
                        }
                        expect = Expect::CommaOrClose;
                    }
                    None => {
                        let end = partial_string_end(bytes, i + 1);
                        let mut repaired = text[..end].to_string();
                        repaired.push('"');
                        repaired.extend(closers.iter().rev().map(|&c| c as char));
                        return Some(repaired);
                    }
                },
                _ => {
                    let end = literal_end(bytes, i);
                    // Unterminated literals may still grow.
                    if end == bytes.len() {
                        break;
                    }
                    if serde_json::from_str::<serde_json::Value>(&text[i..end]).is_err() {
                        break;
                    }
                    i = end;
                    has_value = true;
                    checkpoint = Some((i, closers.clone(), true));
                    if closers.is_empty() {
                        break;
                    }
                    expect = Expect::CommaOrClose;
                }
            },
            Expect::Key => match b {
                b'"' => match string_end(bytes, i + 1) {
                    Some(end) => {
                        i = end;
                        expect = Expect::Colon;
                    }
                    None => break,
                },
                b'}' if closers.last() == Some(&b'}') => {
                    closers.pop();
                    i += 1;
                    if closers.is_empty() {
                        checkpoint = Some((i, closers.clone(), true));
                        break;
                    }
                    expect = Expect::CommaOrClose;
                    checkpoint = Some((i, closers.clone(), has_value));
                }
                _ => break,
            },
            Expect::Colon => {
                if b != b':' {
                    break;
                }
                i += 1;
                expect = Expect::Value;
            }
            Expect::CommaOrClose => match b {
                b',' => {
                    i += 1;
                    expect = if closers.last() == Some(&b'}') {
                        Expect::Key
                    } else {
                        Expect::Value
                    };
                }
                b'}' | b']' if closers.last() == Some(&b) => {
                    closers.pop();
                    i += 1;
                    if closers.is_empty() {
                        checkpoint = Some((i, closers.clone(), true));
                        break;
                    }
                    checkpoint = Some((i, closers.clone(), has_value));
                }
                _ => break,
            },
        }
    }

    let (end, closers, started) = checkpoint?;
    if !started {
        return None;
    }
    let mut repaired = text[..end].to_string();
    repaired.extend(closers.iter().rev().map(|&c| c as char));
    Some(repaired)
}

/// Offset just past the closing quote of a string whose body starts at `start`.
fn string_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

/// Longest prefix of an open string body that holds no cut-off escape.
fn partial_string_end(bytes: &[u8], start: usize) -> usize {
    let mut i = start;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let len = if bytes.get(i + 1) == Some(&b'u') { 6 } else { 2 };
            if i + len > bytes.len() {
                break;
            }
            i += len;
        } else {
            i += 1;
        }
    }
    i.min(bytes.len())
}

fn literal_end(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|b| b.is_ascii_whitespace() || matches!(b, b',' | b'}' | b']' | b':'))
        .map_or(bytes.len(), |p| start + p)
}

/// Accumulates text chunks and projects them onto `T`.
#[derive(Debug)]
pub struct PartialProjection<T> {
    buffer: String,
    _target: PhantomData<fn() -> T>,
}

impl<T> Default for PartialProjection<T> {
    fn default() -> Self {
        Self {
            buffer: String::new(),
            _target: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> PartialProjection<T> {
    /// Empty projection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk; returns the partial value if one can be formed.
    pub fn push(&mut self, chunk: &str) -> Option<T> {
        if chunk.is_empty() {
            return None;
        }
        self.buffer.push_str(chunk);
        let repaired = repair_json(&self.buffer)?;
        serde_json::from_str(&repaired).ok()
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.buffer
    }
}

/// Map a generation stream to a stream of partial values.
///
/// Chunks that cannot yet form a `T` are skipped; generation errors pass
/// through.
pub fn project_partial<S, T>(stream: S) -> impl Stream<Item = Result<T>>
where
    S: Stream<Item = Result<Generation>>,
    T: DeserializeOwned,
{
    let mut projection = PartialProjection::<T>::new();
    stream.filter_map(move |item| {
        let projected = match item {
            Ok(generation) => projection.push(&generation.chunk).map(Ok),
            Err(e) => Some(Err(e)),
        };
        futures::future::ready(projected)
    })
}
