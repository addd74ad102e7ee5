//! HTTP front door: a single `POST /webkdc` protocol endpoint plus a `GET /health`
//! liveness probe. One `make_router<S>` per concern, `axum::extract::State` carrying
//! the shared app state.

use core::fmt;
use core::panic::Location;
use std::error::Error as StdError;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;

use crate::handler::{handle_get_tokens_request, handle_request_token_request};
use crate::krb5::cache::{CredCache, CredCacheLocation};
use crate::krb5::{Krb5Adapter, SystemKrb5Adapter};
use crate::xml::request::{GetTokensRequest, RequestTokenRequest};
use crate::xml::response::ErrorResponseXml;
use crate::xml::{self, XmlError};
use crate::WebKdcState;

/// A status code, the call site that produced it, and an optional message/source —
/// `track_caller` means every error response can be traced back to the line that
/// built it without threading a context string through every `?`.
pub struct HttpError {
    pub code: StatusCode,
    pub loc: &'static Location<'static>,
    pub msg: Option<&'static str>,
    pub source: Option<Box<dyn StdError + Sync + Send + 'static>>,
}

pub struct HttpErrorBuilder {
    code: StatusCode,
    loc: &'static Location<'static>,
    msg: Option<&'static str>,
}

impl HttpErrorBuilder {
    #[track_caller]
    fn new(code: StatusCode) -> Self {
        Self {
            code,
            loc: Location::caller(),
            msg: None,
        }
    }

    fn with_msg(mut self, msg: &'static str) -> Self {
        self.msg = Some(msg);
        self
    }

    fn err<T: Into<Box<dyn StdError + Sync + Send + 'static>>>(self) -> impl FnOnce(T) -> HttpError {
        move |source| HttpError {
            code: self.code,
            loc: self.loc,
            msg: self.msg,
            source: Some(source.into()),
        }
    }

    fn msg(self, msg: &'static str) -> HttpError {
        HttpError {
            code: self.code,
            loc: self.loc,
            msg: Some(msg),
            source: None,
        }
    }

    fn build(self) -> HttpError {
        HttpError {
            code: self.code,
            loc: self.loc,
            msg: self.msg,
            source: None,
        }
    }
}

impl HttpError {
    #[track_caller]
    fn bad_request() -> HttpErrorBuilder {
        HttpErrorBuilder::new(StatusCode::BAD_REQUEST)
    }

    #[track_caller]
    fn internal() -> HttpErrorBuilder {
        HttpErrorBuilder::new(StatusCode::INTERNAL_SERVER_ERROR)
    }

    #[track_caller]
    fn not_found() -> HttpErrorBuilder {
        HttpErrorBuilder::new(StatusCode::NOT_FOUND)
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.code, self.loc)?;
        if let Some(msg) = self.msg {
            write!(f, ": {msg}")?;
        }
        if let Some(source) = self.source.as_deref() {
            write!(f, " [source: {source}]")?;
        }
        Ok(())
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        error!(error = %self);
        self.code.into_response()
    }
}

pub fn make_router(state: WebKdcState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/webkdc", post(post_webkdc))
        .fallback(fallback)
        .with_state(state)
}

/// Unmatched paths 404; a wrong method on a known path (e.g. `GET /webkdc`) gets
/// axum's own automatic 405 before this fallback ever runs.
async fn fallback() -> HttpError {
    HttpError::not_found().build()
}

#[derive(Serialize)]
struct Identity {
    hostname: String,
    version: &'static str,
}

/// An `Accept`-negotiated liveness response: JSON for monitoring tooling, a
/// one-line human string otherwise.
async fn get_health(State(_state): State<WebKdcState>, headers: HeaderMap) -> Response {
    let hostname = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_owned());

    let wants_json = headers
        .get(header::ACCEPT)
        .and_then(|hval| hval.to_str().ok())
        .into_iter()
        .flat_map(|hval| hval.split(','))
        .any(|hval| hval.trim() == "application/json");

    if wants_json {
        axum::Json(Identity {
            hostname,
            version: env!("CARGO_PKG_VERSION"),
        })
        .into_response()
    } else {
        format!("WebKDC \"{hostname}\" is alive.").into_response()
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Which of the two request shapes a `<getTokensRequest>`/`<requestTokenRequest>`
/// body holds, determined by peeking the document's root element name before
/// committing to a concrete `serde` type.
enum RequestRoot {
    GetTokens,
    RequestToken,
}

fn sniff_root_element(body: &str) -> Result<RequestRoot, XmlError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(body);
    loop {
        match reader.read_event() {
            Ok(Event::Start(tag)) | Ok(Event::Empty(tag)) => {
                return match tag.local_name().as_ref() {
                    b"getTokensRequest" => Ok(RequestRoot::GetTokens),
                    b"requestTokenRequest" => Ok(RequestRoot::RequestToken),
                    other => Err(XmlError::Malformed(format!(
                        "unrecognized root element `{}`",
                        String::from_utf8_lossy(other)
                    ))),
                };
            }
            Ok(Event::Eof) => return Err(XmlError::Malformed("empty request body".to_owned())),
            Err(err) => return Err(XmlError::Malformed(err.to_string())),
            _ => continue,
        }
    }
}

/// The single protocol endpoint: dispatches a `getTokensRequest` or
/// `requestTokenRequest` body to [`handle_get_tokens_request`]/
/// [`handle_request_token_request`], rendering either the matching response or a
/// top-level `<errorResponse>`.
///
/// A [`crate::krb5::SystemKrb5Adapter`] and scoped [`CredCache`] are created fresh
/// for this one request and dropped at the end of the handler future, releasing any
/// native resources before the response is sent.
async fn post_webkdc(State(state): State<WebKdcState>, headers: HeaderMap, body: String) -> Result<Response, HttpError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|hval| hval.to_str().ok())
        .unwrap_or_default();
    if !content_type.starts_with("text/xml") && !content_type.starts_with("application/xml") {
        return Err(HttpError::bad_request().msg("Content-Type must be text/xml"));
    }

    let conf = state.conf_handle.get_conf();
    let now = now();

    let unique_name = uuid::Uuid::new_v4().to_string();
    let cache = match &conf.cred_cache {
        CredCacheLocation::Directory(dir) => CredCache::new_file(dir, &unique_name),
        CredCacheLocation::Keyring { name } => CredCache::new_keyring(&format!("{name}_{unique_name}")),
    };
    let mut adapter = SystemKrb5Adapter::with_cache_name(cache.cache_name())
        .map_err(HttpError::internal().with_msg("failed to initialize Kerberos context").err())?;

    let root = sniff_root_element(&body).map_err(HttpError::bad_request().err())?;

    let rendered = match root {
        RequestRoot::GetTokens => {
            let request: GetTokensRequest = xml::parse_request(&body).map_err(HttpError::bad_request().err())?;
            match handle_get_tokens_request(&mut adapter as &mut dyn Krb5Adapter, state.policy.as_ref(), &state.keyring, &conf, now, &request).await {
                Ok(response) => xml::render_response(&response),
                Err(fault) => {
                    crate::error::log_fault(&fault, conf.debug);
                    xml::render_response(&ErrorResponseXml {
                        error_code: fault.code.code(),
                        error_message: fault.message,
                    })
                }
            }
        }
        RequestRoot::RequestToken => {
            let request: RequestTokenRequest = xml::parse_request(&body).map_err(HttpError::bad_request().err())?;
            match handle_request_token_request(&mut adapter as &mut dyn Krb5Adapter, state.policy.as_ref(), &state.keyring, &conf, now, &request).await {
                Ok(response) => xml::render_response(&response),
                Err(fault) => {
                    crate::error::log_fault(&fault, conf.debug);
                    xml::render_response(&ErrorResponseXml {
                        error_code: fault.code.code(),
                        error_message: fault.message,
                    })
                }
            }
        }
    };

    let body = rendered.map_err(HttpError::internal().with_msg("failed to render response XML").err())?;
    Ok(([(header::CONTENT_TYPE, "text/xml")], body).into_response())
}
