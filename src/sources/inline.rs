//! Inline middleware directives.
//!
//! `(req, res, next) => res.status(201).type("json").send({path: req.path})`
//!
//! The directive is compiled once into a fixed reply, a call to a registered
//! middleware, or `next()`. Supported `res` methods are `status`, `set`,
//! `header` and `type`, ending in `send`, `json`, `end` or `sendStatus`.
//! Values may be literals, object literals or `req.path`, `req.url`,
//! `req.originalUrl`, `req.method` and `req.hostname`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::layer::script::{self, Expr, ScriptError};
use crate::pipeline::{Handler, Next};
use crate::routing::matcher::request_host;
use crate::routing::MountPrefix;

/// A named middleware callable from `(req, res, next) => name(req, res, next)`.
pub type NamedMiddleware = Arc<dyn Handler>;

const HTML: &str = "text/html; charset=utf-8";
const JSON: &str = "application/json; charset=utf-8";
const TEXT: &str = "text/plain; charset=utf-8";

#[derive(Debug, Error)]
pub enum MiddlewareError {
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("expected 2 to 4 parameters, found {0}")]
    Arity(usize),

    #[error("unknown middleware `{0}`")]
    Unknown(String),

    #[error("unsupported expression: {0}")]
    Unsupported(String),

    #[error("invalid header `{0}`")]
    Header(String),

    #[error("invalid status `{0}`")]
    Status(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RequestField {
    Path,
    Url,
    OriginalUrl,
    Method,
    Hostname,
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    Num(f64),
    Object(Vec<(String, Value)>),
    Request(RequestField),
}

#[derive(Debug, Clone)]
enum ReplyBody {
    Empty,
    Send(Value),
    Json(Value),
    Reason,
}

#[derive(Debug, Clone)]
struct Reply {
    status: StatusCode,
    headers: Vec<(HeaderName, Value)>,
    content_type: Option<HeaderValue>,
    body: ReplyBody,
}

enum Action {
    Next,
    Delegate(NamedMiddleware),
    Reply(Reply),
}

/// A compiled inline middleware.
pub struct InlineMiddleware {
    action: Action,
}

impl std::fmt::Debug for InlineMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let action = match &self.action {
            Action::Next => "next",
            Action::Delegate(_) => "delegate",
            Action::Reply(_) => "reply",
        };
        f.debug_struct("InlineMiddleware").field("action", &action).finish()
    }
}

struct Params<'p> {
    req: &'p str,
    res: &'p str,
    next: Option<&'p str>,
}

impl InlineMiddleware {
    pub fn compile(def: &str, registry: &HashMap<String, NamedMiddleware>) -> Result<Self, MiddlewareError> {
        let arrow = script::parse_arrow(def)?;
        if !(2..=4).contains(&arrow.params.len()) {
            return Err(MiddlewareError::Arity(arrow.params.len()));
        }
        let params = Params {
            req: &arrow.params[0],
            res: &arrow.params[1],
            next: arrow.params.get(2).map(String::as_str),
        };

        let Expr::Call(callee, args) = &arrow.body else {
            return Err(unsupported(&arrow.body));
        };

        let action = if root_ident(callee) == Some(params.res) {
            Action::Reply(compile_reply(&arrow.body, &params)?)
        } else if callee.as_ident().is_some() && callee.as_ident() == params.next {
            if !args.is_empty() {
                return Err(unsupported(&arrow.body));
            }
            Action::Next
        } else {
            let name = callee.dotted_name().ok_or_else(|| unsupported(callee))?;
            let handler = registry.get(&name).cloned().ok_or(MiddlewareError::Unknown(name))?;
            Action::Delegate(handler)
        };
        Ok(Self { action })
    }

    fn respond(reply: &Reply, req: &Request<Body>) -> Response {
        let mut res = match &reply.body {
            ReplyBody::Empty => Body::empty().into_response(),
            ReplyBody::Reason => {
                let reason = reply.status.canonical_reason().unwrap_or_default().to_owned();
                ([(header::CONTENT_TYPE, TEXT)], reason).into_response()
            }
            ReplyBody::Send(value) => match render(value, req) {
                serde_json::Value::String(text) => ([(header::CONTENT_TYPE, HTML)], text).into_response(),
                json => ([(header::CONTENT_TYPE, JSON)], json.to_string()).into_response(),
            },
            ReplyBody::Json(value) => ([(header::CONTENT_TYPE, JSON)], render(value, req).to_string()).into_response(),
        };

        *res.status_mut() = reply.status;
        if let Some(content_type) = &reply.content_type {
            res.headers_mut().insert(header::CONTENT_TYPE, content_type.clone());
        }
        for (name, value) in &reply.headers {
            let text = match render(value, req) {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            };
            if let Ok(value) = HeaderValue::from_str(&text) {
                res.headers_mut().insert(name.clone(), value);
            }
        }
        res
    }
}

impl Handler for InlineMiddleware {
    fn call<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        match &self.action {
            Action::Next => next.run(req),
            Action::Delegate(handler) => handler.call(req, next),
            Action::Reply(reply) => {
                let res = Self::respond(reply, &req);
                Box::pin(async move { res })
            }
        }
    }

    fn name(&self) -> &str {
        "middleware"
    }
}

fn unsupported(expr: &Expr) -> MiddlewareError {
    MiddlewareError::Unsupported(format!("{expr:?}"))
}

/// Identifier at the root of a member/call chain.
fn root_ident(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Ident(name) => Some(name),
        Expr::Member(target, _) | Expr::Call(target, _) => root_ident(target),
        _ => None,
    }
}

/// Flatten `res.a(..).b(..)` into `[(a, args), (b, args)]`.
fn method_chain<'e>(expr: &'e Expr, res: &str, out: &mut Vec<(&'e str, &'e [Expr])>) -> Result<(), MiddlewareError> {
    match expr {
        Expr::Ident(name) if name == res => Ok(()),
        Expr::Call(callee, args) => match callee.as_ref() {
            Expr::Member(target, method) => {
                method_chain(target, res, out)?;
                out.push((method.as_str(), args.as_slice()));
                Ok(())
            }
            other => Err(unsupported(other)),
        },
        other => Err(unsupported(other)),
    }
}

fn compile_reply(body: &Expr, params: &Params<'_>) -> Result<Reply, MiddlewareError> {
    let mut chain = Vec::new();
    method_chain(body, params.res, &mut chain)?;

    let mut reply = Reply {
        status: StatusCode::OK,
        headers: Vec::new(),
        content_type: None,
        body: ReplyBody::Empty,
    };
    let Some(((terminal, terminal_args), setters)) = chain.split_last() else {
        return Err(unsupported(body));
    };

    for (method, args) in setters {
        match (*method, *args) {
            ("status", [code]) => reply.status = status(code)?,
            ("set" | "header", [name, value]) => {
                let name = literal_str(name).ok_or_else(|| unsupported(name))?;
                let name = HeaderName::try_from(name).map_err(|_| MiddlewareError::Header(name.to_owned()))?;
                reply.headers.push((name, value_of(value, params)?));
            }
            ("type", [kind]) => {
                let kind = literal_str(kind).ok_or_else(|| unsupported(kind))?;
                reply.content_type = Some(content_type_for(kind)?);
            }
            _ => return Err(MiddlewareError::Unsupported(format!("res.{method}()"))),
        }
    }

    reply.body = match (*terminal, *terminal_args) {
        ("send", []) | ("end", []) => ReplyBody::Empty,
        ("send", [value]) => ReplyBody::Send(value_of(value, params)?),
        ("json", [value]) => ReplyBody::Json(value_of(value, params)?),
        ("sendStatus", [code]) => {
            reply.status = status(code)?;
            ReplyBody::Reason
        }
        (method, _) => return Err(MiddlewareError::Unsupported(format!("res.{method}()"))),
    };
    Ok(reply)
}

fn literal_str(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Str(s) => Some(s),
        _ => None,
    }
}

fn status(expr: &Expr) -> Result<StatusCode, MiddlewareError> {
    match expr {
        Expr::Num(n) if n.fract() == 0.0 && (100.0..1000.0).contains(n) => {
            StatusCode::from_u16(*n as u16).map_err(|_| MiddlewareError::Status(n.to_string()))
        }
        other => Err(MiddlewareError::Status(format!("{other:?}"))),
    }
}

/// `res.type()` argument: a full MIME type or an extension.
fn content_type_for(kind: &str) -> Result<HeaderValue, MiddlewareError> {
    let mime = if kind.contains('/') {
        kind.to_owned()
    } else {
        mime_guess::from_ext(kind.trim_start_matches('.'))
            .first_or_octet_stream()
            .to_string()
    };
    HeaderValue::from_str(&mime).map_err(|_| MiddlewareError::Header(kind.to_owned()))
}

fn value_of(expr: &Expr, params: &Params<'_>) -> Result<Value, MiddlewareError> {
    match expr {
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Num(n) => Ok(Value::Num(*n)),
        Expr::Object(fields) => fields
            .iter()
            .map(|(key, value)| Ok((key.clone(), value_of(value, params)?)))
            .collect::<Result<Vec<_>, MiddlewareError>>()
            .map(Value::Object),
        Expr::Member(target, field) if target.as_ident() == Some(params.req) => {
            let field = match field.as_str() {
                "path" => RequestField::Path,
                "url" => RequestField::Url,
                "originalUrl" => RequestField::OriginalUrl,
                "method" => RequestField::Method,
                "hostname" => RequestField::Hostname,
                _ => return Err(unsupported(expr)),
            };
            Ok(Value::Request(field))
        }
        other => Err(unsupported(other)),
    }
}

fn render(value: &Value, req: &Request<Body>) -> serde_json::Value {
    match value {
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Num(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => serde_json::Value::from(*n as i64),
        Value::Num(n) => serde_json::Value::from(*n),
        Value::Object(fields) => serde_json::Value::Object(
            fields
                .iter()
                .map(|(key, value)| (key.clone(), render(value, req)))
                .collect(),
        ),
        Value::Request(field) => serde_json::Value::String(request_field(*field, req)),
    }
}

fn request_field(field: RequestField, req: &Request<Body>) -> String {
    let uri = req.uri();
    let url = uri.path_and_query().map_or(uri.path(), |pq| pq.as_str()).to_owned();
    match field {
        RequestField::Path => uri.path().to_owned(),
        RequestField::Url => url,
        RequestField::OriginalUrl => match req.extensions().get::<MountPrefix>() {
            Some(prefix) => format!("{}{url}", prefix.0),
            None => url,
        },
        RequestField::Method => req.method().to_string(),
        RequestField::Hostname => request_host(req)
            .map(|host| host.rsplit_once(':').map_or(host, |(name, _)| name).to_owned())
            .unwrap_or_default(),
    }
}
