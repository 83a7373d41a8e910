//! Reader for single lines of the Prometheus text exposition format.
//!
//! `name{k="v",...} value [timestamp_ms]`

use super::error::ParseError;
use super::sample::{Labels, Sample, current_timestamp_millis};
use std::iter::Peekable;
use std::str::CharIndices;

pub fn parse_line(line: &str) -> Result<Sample, ParseError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Err(ParseError::Skip);
    }

    let name_end = line
        .find(|c: char| c == '{' || c.is_whitespace())
        .ok_or_else(|| ParseError::InvalidFormat {
            column: line.len(),
            reason: "missing value".to_string(),
        })?;
    let name = &line[..name_end];

    let mut labels = Labels::new();
    let mut rest = &line[name_end..];
    if let Some(body) = rest.strip_prefix('{') {
        let consumed = parse_labels(body, name_end + 1, &mut labels)?;
        rest = &body[consumed..];
    }

    let mut fields = rest.split_whitespace();
    let value = fields
        .next()
        .ok_or_else(|| ParseError::InvalidFormat {
            column: line.len(),
            reason: "missing value".to_string(),
        })
        .and_then(parse_value)?;

    let timestamp = match fields.next() {
        Some(raw) => raw.parse::<i64>().map_err(|_| ParseError::InvalidTimestamp {
            input: raw.to_string(),
        })?,
        None => current_timestamp_millis(),
    };

    if fields.next().is_some() {
        return Err(ParseError::InvalidFormat {
            column: line.len(),
            reason: "unexpected trailing fields".to_string(),
        });
    }

    Ok(Sample::new(name, labels, timestamp, value)?)
}

/// Parses `k="v",...}` and returns the number of bytes consumed, closing brace included.
fn parse_labels(input: &str, offset: usize, labels: &mut Labels) -> Result<usize, ParseError> {
    let mut chars = input.char_indices().peekable();

    loop {
        skip_whitespace(&mut chars);
        match chars.peek().copied() {
            Some((i, '}')) => return Ok(i + 1),
            Some(_) => {}
            None => return Err(unterminated(offset + input.len())),
        }

        let name = read_until_equals(input, &mut chars, offset)?;
        match chars.next() {
            Some((_, '"')) => {}
            Some((i, c)) => {
                return Err(ParseError::InvalidFormat {
                    column: offset + i,
                    reason: format!("expected '\"' for label '{name}', found '{c}'"),
                });
            }
            None => return Err(unterminated(offset + input.len())),
        }
        let value = read_quoted(&mut chars, offset + input.len())?;
        labels.insert(name, value)?;

        skip_whitespace(&mut chars);
        match chars.next() {
            Some((_, ',')) => continue,
            Some((i, '}')) => return Ok(i + 1),
            Some((i, c)) => {
                return Err(ParseError::InvalidFormat {
                    column: offset + i,
                    reason: format!("expected ',' or '}}', found '{c}'"),
                });
            }
            None => return Err(unterminated(offset + input.len())),
        }
    }
}

fn read_until_equals(
    input: &str,
    chars: &mut Peekable<CharIndices<'_>>,
    offset: usize,
) -> Result<String, ParseError> {
    let start = chars.peek().map_or(input.len(), |(i, _)| *i);
    for (i, c) in chars.by_ref() {
        if c == '=' {
            return Ok(input[start..i].trim().to_string());
        }
        if c == '}' || c == ',' || c == '"' {
            return Err(ParseError::InvalidFormat {
                column: offset + i,
                reason: "missing '=' after label name".to_string(),
            });
        }
    }
    Err(unterminated(offset + input.len()))
}

fn read_quoted(chars: &mut Peekable<CharIndices<'_>>, end: usize) -> Result<String, ParseError> {
    let mut value = String::new();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok(value),
            '\\' => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, '\\')) => value.push('\\'),
                Some((_, '"')) => value.push('"'),
                Some((_, other)) => {
                    value.push('\\');
                    value.push(other);
                }
                None => return Err(unterminated(i)),
            },
            other => value.push(other),
        }
    }
    Err(unterminated(end))
}

fn skip_whitespace(chars: &mut Peekable<CharIndices<'_>>) {
    while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
}

fn unterminated(column: usize) -> ParseError {
    ParseError::InvalidFormat {
        column,
        reason: "unterminated label set".to_string(),
    }
}

fn parse_value(raw: &str) -> Result<f64, ParseError> {
    match raw {
        "NaN" => Ok(f64::NAN),
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        _ => raw.parse::<f64>().map_err(|_| ParseError::InvalidValue {
            input: raw.to_string(),
        }),
    }
}
