//! Access log.
//!
//! # Responsibilities
//! - Write one line per request to the log sink
//! - Support the common predefined formats: `tiny`, `short`, `dev`,
//!   `common` and `combined`
//!
//! # Design Decisions
//! - A format is a fixed list of fields, resolved once at startup
//! - Request-side fields are captured before the pipeline runs, since stages
//!   strip headers such as `Authorization`
//! - Missing values are written as `-`

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, Request, Version};
use axum::middleware::Next;
use axum::response::Response;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};

use crate::observability::SharedSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogField {
    Text(&'static str),
    RemoteAddr,
    RemoteUser,
    Date,
    Method,
    Url,
    HttpVersion,
    Status,
    ContentLength,
    ResponseTime,
    Referrer,
    UserAgent,
}

/// Predefined access log formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Tiny,
    Short,
    Dev,
    Common,
    Combined,
}

/// Unknown format name.
#[derive(Debug, thiserror::Error)]
#[error("unknown log format `{0}`")]
pub struct UnknownLogFormat(pub String);

impl FromStr for LogFormat {
    type Err = UnknownLogFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tiny" => Ok(LogFormat::Tiny),
            "short" => Ok(LogFormat::Short),
            "dev" => Ok(LogFormat::Dev),
            "common" => Ok(LogFormat::Common),
            "combined" => Ok(LogFormat::Combined),
            other => Err(UnknownLogFormat(other.to_owned())),
        }
    }
}

impl LogFormat {
    fn fields(self) -> &'static [LogField] {
        use LogField::*;
        match self {
            LogFormat::Tiny => &[
                Method, Text(" "), Url, Text(" "), Status, Text(" "), ContentLength, Text(" - "), ResponseTime, Text(" ms"),
            ],
            LogFormat::Short => &[
                RemoteAddr, Text(" "), RemoteUser, Text(" "), Method, Text(" "), Url, Text(" HTTP/"), HttpVersion,
                Text(" "), Status, Text(" "), ContentLength, Text(" - "), ResponseTime, Text(" ms"),
            ],
            LogFormat::Dev => &[
                Method, Text(" "), Url, Text(" "), Status, Text(" "), ResponseTime, Text(" ms - "), ContentLength,
            ],
            LogFormat::Common => &[
                RemoteAddr, Text(" - "), RemoteUser, Text(" ["), Date, Text("] \""), Method, Text(" "), Url,
                Text(" HTTP/"), HttpVersion, Text("\" "), Status, Text(" "), ContentLength,
            ],
            LogFormat::Combined => &[
                RemoteAddr, Text(" - "), RemoteUser, Text(" ["), Date, Text("] \""), Method, Text(" "), Url,
                Text(" HTTP/"), HttpVersion, Text("\" "), Status, Text(" "), ContentLength, Text(" \""), Referrer,
                Text("\" \""), UserAgent, Text("\""),
            ],
        }
    }
}

/// State for the access log middleware.
#[derive(Clone)]
pub struct AccessLog {
    format: LogFormat,
    sink: SharedSink,
}

impl AccessLog {
    pub fn new(format: LogFormat, sink: SharedSink) -> Self {
        Self { format, sink }
    }
}

/// Request-side values, captured before the pipeline runs.
struct RequestInfo {
    remote_addr: Option<SocketAddr>,
    remote_user: Option<String>,
    method: String,
    url: String,
    version: Version,
    referrer: Option<String>,
    user_agent: Option<String>,
    date: DateTime<Utc>,
}

impl RequestInfo {
    fn capture(req: &Request<Body>) -> Self {
        let headers = req.headers();
        Self {
            remote_addr: req.extensions().get::<ConnectInfo<SocketAddr>>().map(|c| c.0),
            remote_user: basic_user(headers),
            method: req.method().to_string(),
            url: req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_owned())
                .unwrap_or_else(|| req.uri().path().to_owned()),
            version: req.version(),
            referrer: header_str(headers, header::REFERER).map(str::to_owned),
            user_agent: header_str(headers, header::USER_AGENT).map(str::to_owned),
            date: Utc::now(),
        }
    }
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// User name from a Basic `Authorization` header.
fn basic_user(headers: &HeaderMap) -> Option<String> {
    let value = header_str(headers, header::AUTHORIZATION)?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(token.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, _) = decoded.split_once(':')?;
    Some(user.to_owned())
}

fn http_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2.0",
        Version::HTTP_3 => "3.0",
        _ => "1.1",
    }
}

fn render(format: LogFormat, info: &RequestInfo, res: &Response, started: Instant) -> String {
    let mut line = String::with_capacity(128);
    let dash = |v: Option<&str>| v.unwrap_or("-").to_owned();

    for field in format.fields() {
        let value = match field {
            LogField::Text(text) => (*text).to_owned(),
            LogField::RemoteAddr => dash(info.remote_addr.map(|a| a.ip().to_string()).as_deref()),
            LogField::RemoteUser => dash(info.remote_user.as_deref()),
            LogField::Date => info.date.format("%d/%b/%Y:%H:%M:%S %z").to_string(),
            LogField::Method => info.method.clone(),
            LogField::Url => info.url.clone(),
            LogField::HttpVersion => http_version(info.version).to_owned(),
            LogField::Status => res.status().as_u16().to_string(),
            LogField::ContentLength => dash(header_str(res.headers(), header::CONTENT_LENGTH)),
            LogField::ResponseTime => format!("{:.3}", started.elapsed().as_secs_f64() * 1000.0),
            LogField::Referrer => dash(info.referrer.as_deref()),
            LogField::UserAgent => dash(info.user_agent.as_deref()),
        };
        let _ = write!(line, "{value}");
    }
    line
}

/// Middleware writing one access log line per request.
pub async fn access_log(State(log): State<AccessLog>, req: Request<Body>, next: Next) -> Response {
    let started = Instant::now();
    let info = RequestInfo::capture(&req);

    let res = next.run(req).await;
    log.sink.log(&render(log.format, &info, &res, started));
    res
}
