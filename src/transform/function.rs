//! Function transforms: `<type>(<body>)`.
//!
//! `<type>` selects responses by content type, matched as a whole word and
//! case-insensitively (`html` matches `text/html; charset=utf-8`). The body
//! is either the name of a registered function or an arrow function over
//! the body text:
//!
//! ```text
//! html(s => s.replace(/sample/g, 'FOO').toUpperCase())
//! text(toHalfWidth)
//! ```
//!
//! Arrow functions are compiled once into a list of string operations.
//! Supported methods: `replace`, `replaceAll`, `toLowerCase`, `toUpperCase`,
//! `trim`, `trimStart`, `trimEnd`.

use std::collections::HashMap;

use regex::{Regex, RegexBuilder};
use thiserror::Error;

use crate::layer::script::{self, Expr, ScriptError};
use crate::transform::{Transform, TransformError, TransformFn};

#[derive(Debug, Error)]
pub enum FunctionError {
    #[error("missing content type before `(`")]
    MissingType,

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("expected one parameter, found {0}")]
    Arity(usize),

    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("unsupported method `{0}`")]
    UnsupportedMethod(String),

    #[error("unsupported expression")]
    UnsupportedExpression,

    #[error("invalid arguments to `{0}`")]
    InvalidArguments(String),

    #[error("unsupported regex flag `{0}`")]
    UnknownFlag(char),

    #[error(transparent)]
    Regex(#[from] regex::Error),
}

#[derive(Debug, Clone)]
enum StringOp {
    Replace {
        regex: Regex,
        replacement: String,
        global: bool,
    },
    Lowercase,
    Uppercase,
    Trim,
    TrimStart,
    TrimEnd,
}

impl StringOp {
    fn compile(method: &str, args: &[Expr]) -> Result<Self, FunctionError> {
        let no_args = |op: StringOp| {
            if args.is_empty() {
                Ok(op)
            } else {
                Err(FunctionError::InvalidArguments(method.to_owned()))
            }
        };

        match method {
            "replace" | "replaceAll" => {
                let [pattern, replacement] = args else {
                    return Err(FunctionError::InvalidArguments(method.to_owned()));
                };
                let Expr::Str(replacement) = replacement else {
                    return Err(FunctionError::InvalidArguments(method.to_owned()));
                };
                let (regex, global) = match pattern {
                    Expr::Regex { pattern, flags } => compile_regex(pattern, flags)?,
                    Expr::Str(literal) => (Regex::new(&regex::escape(literal))?, false),
                    _ => return Err(FunctionError::InvalidArguments(method.to_owned())),
                };
                Ok(StringOp::Replace {
                    regex,
                    replacement: replacement_template(replacement),
                    global: global || method == "replaceAll",
                })
            }
            "toLowerCase" | "toLocaleLowerCase" => no_args(StringOp::Lowercase),
            "toUpperCase" | "toLocaleUpperCase" => no_args(StringOp::Uppercase),
            "trim" => no_args(StringOp::Trim),
            "trimStart" | "trimLeft" => no_args(StringOp::TrimStart),
            "trimEnd" | "trimRight" => no_args(StringOp::TrimEnd),
            other => Err(FunctionError::UnsupportedMethod(other.to_owned())),
        }
    }

    fn run(&self, text: String) -> String {
        match self {
            StringOp::Replace {
                regex,
                replacement,
                global: true,
            } => regex.replace_all(&text, replacement.as_str()).into_owned(),
            StringOp::Replace { regex, replacement, .. } => regex.replace(&text, replacement.as_str()).into_owned(),
            StringOp::Lowercase => text.to_lowercase(),
            StringOp::Uppercase => text.to_uppercase(),
            StringOp::Trim => text.trim().to_owned(),
            StringOp::TrimStart => text.trim_start().to_owned(),
            StringOp::TrimEnd => text.trim_end().to_owned(),
        }
    }
}

fn compile_regex(pattern: &str, flags: &str) -> Result<(Regex, bool), FunctionError> {
    let mut builder = RegexBuilder::new(pattern);
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
            // patterns are always Unicode-aware here
            'u' => {}
            other => return Err(FunctionError::UnknownFlag(other)),
        }
    }
    Ok((builder.build()?, global))
}

/// Convert `$&`, `$1` and `$<name>` into `regex` expansion syntax.
fn replacement_template(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len());
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('$') => {
                chars.next();
                out.push_str("$$");
            }
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
            Some('<') => {
                let name: String = chars.clone().skip(1).take_while(|c| *c != '>').collect();
                let closed = chars.clone().nth(1 + name.chars().count()) == Some('>');
                if closed && !name.is_empty() {
                    for _ in 0..name.chars().count() + 2 {
                        chars.next();
                    }
                    out.push_str(&format!("${{{name}}}"));
                } else {
                    out.push_str("$$");
                }
            }
            _ => out.push_str("$$"),
        }
    }
    out
}

enum Body {
    Ops(Vec<StringOp>),
    Named(TransformFn),
}

/// A compiled `<type>(<body>)` directive.
pub struct FunctionTransform {
    content_type: String,
    type_regex: Regex,
    body: Body,
}

impl std::fmt::Debug for FunctionTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTransform")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

impl FunctionTransform {
    /// Compile a directive payload such as `html(s => s.toLowerCase())`.
    pub fn compile(def: &str, registry: &HashMap<String, TransformFn>) -> Result<Self, FunctionError> {
        let open = def.find('(').ok_or(FunctionError::UnsupportedExpression)?;
        let content_type = def[..open].trim();
        if content_type.is_empty() {
            return Err(FunctionError::MissingType);
        }
        let source = def[open..]
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .ok_or(FunctionError::UnsupportedExpression)?;

        let type_regex = Regex::new(&format!(r"(?i)(^|\W){}(\W|$)", regex::escape(content_type)))?;

        let body = if script::looks_like_arrow(source) {
            let arrow = script::parse_arrow(source)?;
            let [param] = arrow.params.as_slice() else {
                return Err(FunctionError::Arity(arrow.params.len()));
            };
            let mut ops = Vec::new();
            compile_chain(&arrow.body, param, &mut ops)?;
            Body::Ops(ops)
        } else {
            let expr = script::parse_expr(source)?;
            let name = expr.dotted_name().ok_or(FunctionError::UnsupportedExpression)?;
            let function = registry
                .get(&name)
                .cloned()
                .ok_or(FunctionError::UnknownFunction(name))?;
            Body::Named(function)
        };

        Ok(Self {
            content_type: content_type.to_owned(),
            type_regex,
            body,
        })
    }

    /// The content-type token before `(`.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }
}

impl Transform for FunctionTransform {
    fn accepts(&self, content_type: &str) -> bool {
        self.type_regex.is_match(content_type)
    }

    fn apply(&self, text: &str) -> Result<String, TransformError> {
        match &self.body {
            Body::Ops(ops) => Ok(ops.iter().fold(text.to_owned(), |acc, op| op.run(acc))),
            Body::Named(function) => function(text),
        }
    }
}

fn compile_chain(expr: &Expr, param: &str, ops: &mut Vec<StringOp>) -> Result<(), FunctionError> {
    match expr {
        Expr::Ident(name) if name == param => Ok(()),
        Expr::Call(callee, args) => match callee.as_ref() {
            Expr::Member(target, method) => {
                compile_chain(target, param, ops)?;
                ops.push(StringOp::compile(method, args)?);
                Ok(())
            }
            _ => Err(FunctionError::UnsupportedExpression),
        },
        _ => Err(FunctionError::UnsupportedExpression),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn compile(def: &str) -> Result<FunctionTransform, FunctionError> {
        FunctionTransform::compile(def, &HashMap::new())
    }

    fn run(def: &str, input: &str) -> String {
        compile(def).unwrap().apply(input).unwrap()
    }

    #[test]
    fn test_content_type_token() {
        let html = compile("html(s => s.toLowerCase())").unwrap();
        assert_eq!(html.content_type(), "html");
        assert!(html.accepts("text/html; charset=UTF-8"));
        assert!(html.accepts("TEXT/HTML"));
        assert!(!html.accepts("text/css"));
        assert!(!html.accepts("application/xhtml"));

        let json = compile("json(s => s.trim())").unwrap();
        assert!(json.accepts("application/json"));
        assert!(json.accepts("application/ld+json"));
    }

    #[test]
    fn test_replace_first_and_global() {
        assert_eq!(run("html(s => s.replace(/sample/,'FOO'))", "sample sample"), "FOO sample");
        assert_eq!(run("html(s => s.replace(/sample/g,'FOO'))", "sample sample"), "FOO FOO");
        assert_eq!(run("html(s => s.replaceAll('a.', 'b'))", "a.a.ab"), "bbab");
        assert_eq!(run("html(s => s.replace(/SAMPLE/i, \"x\"))", "a sample"), "a x");
    }

    #[test]
    fn test_replacement_patterns() {
        assert_eq!(run(r"text(s => s.replace(/(\w+)@(\w+)/, '$2 at $1'))", "me@home"), "home at me");
        assert_eq!(run("text(s => s.replace(/b/, '[$&]'))", "abc"), "a[b]c");
        assert_eq!(run("text(s => s.replace(/(?<x>b)/, '<$<x>>'))", "abc"), "a<b>c");
        assert_eq!(run("text(s => s.replace(/b/, '$$'))", "abc"), "a$c");
    }

    #[test]
    fn test_method_chain() {
        assert_eq!(run("text(s => s.trim().toUpperCase())", "  hi  "), "HI");
        assert_eq!(run("text(body => body)", "same"), "same");
    }

    #[test]
    fn test_registered_function() {
        let mut registry: HashMap<String, TransformFn> = HashMap::new();
        registry.insert("jaconv.toHanAscii".into(), Arc::new(|s: &str| Ok::<_, TransformError>(s.replace('０', "0"))));

        let transform = FunctionTransform::compile("text(jaconv.toHanAscii)", &registry).unwrap();
        assert_eq!(transform.apply("０-０").unwrap(), "0-0");

        assert!(matches!(
            FunctionTransform::compile("text(unknown)", &registry),
            Err(FunctionError::UnknownFunction(name)) if name == "unknown"
        ));
    }

    #[test]
    fn test_invalid_functions() {
        assert!(matches!(compile("html((a, b) => a)"), Err(FunctionError::Arity(2))));
        assert!(matches!(compile("html(s => s.split(','))"), Err(FunctionError::UnsupportedMethod(_))));
        assert!(matches!(compile("html(s => t.trim())"), Err(FunctionError::UnsupportedExpression)));
        assert!(matches!(compile("html(s => s.replace(/x/y, ''))"), Err(FunctionError::UnknownFlag('y'))));
        assert!(matches!(compile("html(s => s.trim(1))"), Err(FunctionError::InvalidArguments(_))));
        assert!(matches!(compile("html(s => s.replace(/(/, ''))"), Err(FunctionError::Regex(_))));
        assert!(matches!(compile("html(s => s.replace(/x/))"), Err(FunctionError::InvalidArguments(_))));
    }
}
