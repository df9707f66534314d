//! Expression reader for function and middleware directive bodies.
//!
//! Directive bodies look like JavaScript arrow functions. Nothing is
//! evaluated: the text is tokenized and parsed into a small expression tree
//! once at startup, and the transform and middleware compilers decide which
//! shapes they accept.
//!
//! Grammar:
//! ```text
//! arrow   := params "=>" expr
//! params  := ident | "(" [ident ("," ident)*] ")"
//! expr    := primary ( "." ident | "(" [expr ("," expr)*] ")" )*
//! primary := ident | string | number | regex | object | "(" expr ")"
//! object  := "{" [key ":" expr ("," key ":" expr)*] "}"
//! ```
//! A `/` always opens a regular expression literal; there is no division.

use std::fmt;

use thiserror::Error;

/// Failure to read a directive body.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScriptError {
    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("unexpected `{found}` at offset {offset}")]
    Unexpected { found: String, offset: usize },

    #[error("unterminated {0} literal")]
    Unterminated(&'static str),

    #[error("template literal substitutions are not supported")]
    Template,

    #[error("trailing input at offset {0}")]
    Trailing(usize),
}

/// Expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Ident(String),
    Str(String),
    Num(f64),
    Regex { pattern: String, flags: String },
    Object(Vec<(String, Expr)>),
    Member(Box<Expr>, String),
    Call(Box<Expr>, Vec<Expr>),
}

impl Expr {
    /// Identifier name when the expression is a bare identifier.
    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Expr::Ident(name) => Some(name),
            _ => None,
        }
    }

    /// `name` or `module.name`, used as a registry key.
    pub fn dotted_name(&self) -> Option<String> {
        match self {
            Expr::Ident(name) => Some(name.clone()),
            Expr::Member(target, name) => Some(format!("{}.{name}", target.dotted_name()?)),
            _ => None,
        }
    }
}

/// A parsed arrow function.
#[derive(Debug, Clone, PartialEq)]
pub struct Arrow {
    pub params: Vec<String>,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Regex { pattern: String, flags: String },
    Arrow,
    Punct(char),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => f.write_str(s),
            Token::Str(s) => write!(f, "{s:?}"),
            Token::Num(n) => write!(f, "{n}"),
            Token::Regex { pattern, flags } => write!(f, "/{pattern}/{flags}"),
            Token::Arrow => f.write_str("=>"),
            Token::Punct(c) => write!(f, "{c}"),
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<(usize, Token)>, ScriptError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '=' if matches!(chars.get(i + 1), Some((_, '>'))) => {
                tokens.push((offset, Token::Arrow));
                i += 2;
            }
            '"' | '\'' | '`' => {
                let (value, next) = read_string(&chars, i + 1, c)?;
                tokens.push((offset, Token::Str(value)));
                i = next;
            }
            '/' => {
                let (pattern, next) = read_regex(&chars, i + 1)?;
                let mut flags = String::new();
                let mut j = next;
                while let Some(&(_, f)) = chars.get(j) {
                    if !f.is_ascii_alphabetic() {
                        break;
                    }
                    flags.push(f);
                    j += 1;
                }
                tokens.push((offset, Token::Regex { pattern, flags }));
                i = j;
            }
            c if c.is_ascii_digit() => {
                let mut j = i;
                while chars.get(j).is_some_and(|(_, d)| d.is_ascii_digit() || *d == '.') {
                    j += 1;
                }
                let text: String = chars[i..j].iter().map(|(_, d)| d).collect();
                let value = text.parse().map_err(|_| ScriptError::Unexpected {
                    found: text.clone(),
                    offset,
                })?;
                tokens.push((offset, Token::Num(value)));
                i = j;
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut j = i;
                while chars
                    .get(j)
                    .is_some_and(|(_, d)| d.is_alphanumeric() || *d == '_' || *d == '$')
                {
                    j += 1;
                }
                tokens.push((offset, Token::Ident(chars[i..j].iter().map(|(_, d)| d).collect())));
                i = j;
            }
            '(' | ')' | '{' | '}' | ',' | '.' | ':' | ';' => {
                tokens.push((offset, Token::Punct(c)));
                i += 1;
            }
            other => {
                return Err(ScriptError::Unexpected {
                    found: other.to_string(),
                    offset,
                })
            }
        }
    }
    Ok(tokens)
}

fn read_string(chars: &[(usize, char)], mut i: usize, quote: char) -> Result<(String, usize), ScriptError> {
    let mut value = String::new();
    while let Some(&(_, c)) = chars.get(i) {
        match c {
            c if c == quote => return Ok((value, i + 1)),
            '$' if quote == '`' && matches!(chars.get(i + 1), Some((_, '{'))) => {
                return Err(ScriptError::Template)
            }
            '\\' => {
                let (_, escaped) = *chars.get(i + 1).ok_or(ScriptError::Unterminated("string"))?;
                value.push(match escaped {
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    '0' => '\0',
                    other => other,
                });
                i += 2;
            }
            c => {
                value.push(c);
                i += 1;
            }
        }
    }
    Err(ScriptError::Unterminated("string"))
}

fn read_regex(chars: &[(usize, char)], mut i: usize) -> Result<(String, usize), ScriptError> {
    let mut pattern = String::new();
    let mut in_class = false;
    while let Some(&(_, c)) = chars.get(i) {
        match c {
            '\\' => {
                let (_, escaped) = *chars.get(i + 1).ok_or(ScriptError::Unterminated("regex"))?;
                // `\/` only exists to hide the delimiter
                if escaped != '/' {
                    pattern.push('\\');
                }
                pattern.push(escaped);
                i += 2;
                continue;
            }
            '[' => in_class = true,
            ']' => in_class = false,
            '/' if !in_class => return Ok((pattern, i + 1)),
            '\n' => return Err(ScriptError::Unterminated("regex")),
            _ => {}
        }
        pattern.push(c);
        i += 1;
    }
    Err(ScriptError::Unterminated("regex"))
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn new(src: &str) -> Result<Self, ScriptError> {
        Ok(Self {
            tokens: tokenize(src)?,
            pos: 0,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn next(&mut self) -> Result<(usize, Token), ScriptError> {
        let token = self.tokens.get(self.pos).cloned().ok_or(ScriptError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn eat(&mut self, punct: char) -> bool {
        if self.peek() == Some(&Token::Punct(punct)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: char) -> Result<(), ScriptError> {
        let (offset, token) = self.next()?;
        if token == Token::Punct(punct) {
            Ok(())
        } else {
            Err(ScriptError::Unexpected {
                found: token.to_string(),
                offset,
            })
        }
    }

    fn ident(&mut self) -> Result<String, ScriptError> {
        match self.next()? {
            (_, Token::Ident(name)) => Ok(name),
            (offset, token) => Err(ScriptError::Unexpected {
                found: token.to_string(),
                offset,
            }),
        }
    }

    fn finish(&mut self) -> Result<(), ScriptError> {
        // a trailing semicolon is harmless
        self.eat(';');
        match self.tokens.get(self.pos) {
            None => Ok(()),
            Some((offset, _)) => Err(ScriptError::Trailing(*offset)),
        }
    }

    fn arrow(&mut self) -> Result<Arrow, ScriptError> {
        let params = if self.eat('(') {
            let mut params = Vec::new();
            if !self.eat(')') {
                loop {
                    params.push(self.ident()?);
                    if self.eat(')') {
                        break;
                    }
                    self.expect(',')?;
                }
            }
            params
        } else {
            vec![self.ident()?]
        };

        match self.next()? {
            (_, Token::Arrow) => {}
            (offset, token) => {
                return Err(ScriptError::Unexpected {
                    found: token.to_string(),
                    offset,
                })
            }
        }

        let body = self.expr()?;
        Ok(Arrow { params, body })
    }

    fn expr(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat('.') {
                let name = self.ident()?;
                expr = Expr::Member(Box::new(expr), name);
            } else if self.eat('(') {
                let args = self.list(')')?;
                expr = Expr::Call(Box::new(expr), args);
            } else {
                return Ok(expr);
            }
        }
    }

    fn list(&mut self, close: char) -> Result<Vec<Expr>, ScriptError> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.expr()?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(',')?;
        }
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        match self.next()? {
            (_, Token::Ident(name)) => Ok(Expr::Ident(name)),
            (_, Token::Str(value)) => Ok(Expr::Str(value)),
            (_, Token::Num(value)) => Ok(Expr::Num(value)),
            (_, Token::Regex { pattern, flags }) => Ok(Expr::Regex { pattern, flags }),
            (_, Token::Punct('(')) => {
                let inner = self.expr()?;
                self.expect(')')?;
                Ok(inner)
            }
            (_, Token::Punct('{')) => self.object(),
            (offset, token) => Err(ScriptError::Unexpected {
                found: token.to_string(),
                offset,
            }),
        }
    }

    fn object(&mut self) -> Result<Expr, ScriptError> {
        let mut fields = Vec::new();
        if self.eat('}') {
            return Ok(Expr::Object(fields));
        }
        loop {
            let key = match self.next()? {
                (_, Token::Ident(key)) | (_, Token::Str(key)) => key,
                (offset, token) => {
                    return Err(ScriptError::Unexpected {
                        found: token.to_string(),
                        offset,
                    })
                }
            };
            self.expect(':')?;
            fields.push((key, self.expr()?));
            if self.eat('}') {
                return Ok(Expr::Object(fields));
            }
            self.expect(',')?;
        }
    }
}

/// Parse an arrow function such as `s => s.toLowerCase()`.
pub fn parse_arrow(src: &str) -> Result<Arrow, ScriptError> {
    let mut parser = Parser::new(src)?;
    let arrow = parser.arrow()?;
    parser.finish()?;
    Ok(arrow)
}

/// Parse a lone expression such as a registered function name.
pub fn parse_expr(src: &str) -> Result<Expr, ScriptError> {
    let mut parser = Parser::new(src)?;
    let expr = parser.expr()?;
    parser.finish()?;
    Ok(expr)
}

/// Whether the source starts like an arrow function.
pub fn looks_like_arrow(src: &str) -> bool {
    tokenize(src)
        .map(|tokens| tokens.iter().any(|(_, t)| *t == Token::Arrow))
        .unwrap_or(false)
}
