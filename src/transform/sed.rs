//! `sed`-style substitutions.
//!
//! `s<d>pattern<d>replacement<d>flags`, where `<d>` is any punctuation
//! character. Several expressions may be given on separate lines; they run
//! in order.
//!
//! Flags: `g` (every match), `i`, `m`, `s`, `x`. In the replacement, `&` and
//! `\0` stand for the whole match, `\1`..`\9` and `$1`.. for groups, and
//! `\n`, `\t`, `\\` for newline, tab and backslash.

use regex::{Regex, RegexBuilder};
use thiserror::Error;

use crate::transform::{is_textual, Transform, TransformError};

#[derive(Debug, Error)]
pub enum SedError {
    #[error("not a substitution: {0}")]
    NotSubstitution(String),

    #[error("invalid delimiter `{0}`")]
    InvalidDelimiter(char),

    #[error("unterminated substitution: {0}")]
    Unterminated(String),

    #[error("unknown flag `{0}`")]
    UnknownFlag(char),

    #[error(transparent)]
    Regex(#[from] regex::Error),
}

#[derive(Debug, Clone)]
struct Substitution {
    regex: Regex,
    replacement: String,
    global: bool,
}

/// One or more compiled substitutions.
#[derive(Debug, Clone)]
pub struct SedTransform {
    commands: Vec<Substitution>,
}

impl SedTransform {
    pub fn parse(expr: &str) -> Result<Self, SedError> {
        let commands = expr
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(parse_command)
            .collect::<Result<Vec<_>, _>>()?;

        if commands.is_empty() {
            return Err(SedError::NotSubstitution(expr.to_owned()));
        }
        Ok(Self { commands })
    }

    /// Apply every substitution in order.
    pub fn substitute(&self, text: &str) -> String {
        let mut out = text.to_owned();
        for cmd in &self.commands {
            let replaced = if cmd.global {
                cmd.regex.replace_all(&out, cmd.replacement.as_str())
            } else {
                cmd.regex.replace(&out, cmd.replacement.as_str())
            };
            out = replaced.into_owned();
        }
        out
    }
}

impl Transform for SedTransform {
    fn accepts(&self, content_type: &str) -> bool {
        is_textual(content_type)
    }

    fn apply(&self, text: &str) -> Result<String, TransformError> {
        Ok(self.substitute(text))
    }
}

fn parse_command(cmd: &str) -> Result<Substitution, SedError> {
    let mut chars = cmd.chars();
    if chars.next() != Some('s') {
        return Err(SedError::NotSubstitution(cmd.to_owned()));
    }
    let delim = chars
        .next()
        .ok_or_else(|| SedError::NotSubstitution(cmd.to_owned()))?;
    if !delim.is_ascii_punctuation() || delim == '\\' {
        return Err(SedError::InvalidDelimiter(delim));
    }

    let (pattern, rest) = split_field(chars.as_str(), delim).ok_or_else(|| SedError::Unterminated(cmd.to_owned()))?;
    let (replacement, flags) = split_field(rest, delim).ok_or_else(|| SedError::Unterminated(cmd.to_owned()))?;

    let mut builder = RegexBuilder::new(&pattern_source(pattern, delim));
    let mut global = false;
    for flag in flags.chars() {
        match flag {
            'g' => global = true,
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            other => return Err(SedError::UnknownFlag(other)),
        }
    }

    Ok(Substitution {
        regex: builder.build()?,
        replacement: replacement_template(replacement, delim),
        global,
    })
}

/// Split at the first unescaped delimiter.
fn split_field(input: &str, delim: char) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == delim {
            return Some((&input[..i], &input[i + c.len_utf8()..]));
        }
    }
    None
}

fn pattern_source(pattern: &str, delim: char) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(d) if d == delim => out.push_str(&regex::escape(&d.to_string())),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push_str(r"\\"),
        }
    }
    out
}

/// Convert a sed replacement into `regex` expansion syntax.
fn replacement_template(replacement: &str, delim: char) -> String {
    let mut out = String::with_capacity(replacement.len());
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '&' => out.push_str("${0}"),
            '$' => match chars.peek() {
                Some('&') => {
                    chars.next();
                    out.push_str("${0}");
                }
                Some(d) if d.is_ascii_digit() => {
                    let mut group = String::new();
                    while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                        group.push(*d);
                        chars.next();
                    }
                    out.push_str(&format!("${{{group}}}"));
                }
                _ => out.push_str("$$"),
            },
            '\\' => match chars.next() {
                Some(d) if d.is_ascii_digit() => out.push_str(&format!("${{{d}}}")),
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('$') => out.push_str("$$"),
                Some(d) if d == delim => {
                    if d == '$' {
                        out.push_str("$$");
                    } else {
                        out.push(d);
                    }
                }
                Some(other) => out.push(other),
                None => out.push('\\'),
            },
            other => out.push(other),
        }
    }
    out
}
