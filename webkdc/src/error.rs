//! Stable numeric error-code taxonomy plus the two response surfaces a
//! failure can take: a top-level `<errorResponse>`, or a folded `loginErrorCode` inside
//! an otherwise-200 `<requestTokenResponse>`.

use core::fmt;

/// Stable numeric error codes. Discriminants are part of the wire contract — once
/// assigned they must never be renumbered, only appended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum WebKdcErrorCode {
    ServerFailure = 1,
    InvalidRequest = 2,
    ServiceTokenInvalid = 3,
    ServiceTokenExpired = 4,
    ProxyTokenInvalid = 5,
    ProxyTokenExpired = 6,
    RequestTokenInvalid = 7,
    RequestTokenExpired = 8,
    RequestTokenStale = 9,
    LoginTokenInvalid = 10,
    LoginTokenStale = 11,
    RequesterKrb5CredInvalid = 12,
    LoginFailed = 13,
    LoginCanceled = 14,
    LoginForced = 15,
    ProxyTokenRequired = 16,
    Unauthorized = 17,
    GetCredFailure = 18,
}

impl WebKdcErrorCode {
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Whether a user/client caused this failure (bad password, stale token, malformed
    /// XML) as opposed to an internal/resource failure. Used to gate debug-only
    /// logging so hostile or broken clients can't flood the error log.
    pub const fn is_user_caused(self) -> bool {
        !matches!(self, Self::ServerFailure | Self::GetCredFailure)
    }
}

impl fmt::Display for WebKdcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ServerFailure => "server_failure",
            Self::InvalidRequest => "invalid_request",
            Self::ServiceTokenInvalid => "service_token_invalid",
            Self::ServiceTokenExpired => "service_token_expired",
            Self::ProxyTokenInvalid => "proxy_token_invalid",
            Self::ProxyTokenExpired => "proxy_token_expired",
            Self::RequestTokenInvalid => "request_token_invalid",
            Self::RequestTokenExpired => "request_token_expired",
            Self::RequestTokenStale => "request_token_stale",
            Self::LoginTokenInvalid => "login_token_invalid",
            Self::LoginTokenStale => "login_token_stale",
            Self::RequesterKrb5CredInvalid => "requester_krb5_cred_invalid",
            Self::LoginFailed => "login_failed",
            Self::LoginCanceled => "login_canceled",
            Self::LoginForced => "login_forced",
            Self::ProxyTokenRequired => "proxy_token_required",
            Self::Unauthorized => "unauthorized",
            Self::GetCredFailure => "get_cred_failure",
        };
        f.write_str(name)
    }
}

/// A fatal failure that terminates request processing with a top-level
/// `<errorResponse>`. Not every [`WebKdcErrorCode`] can appear here — the
/// `login_*`/`proxy_token_required`/`unauthorized` subset is folded into a positive
/// response instead (see [`crate::handler`]).
#[derive(Debug, Clone)]
pub struct WebKdcFault {
    pub code: WebKdcErrorCode,
    pub message: String,
}

impl WebKdcFault {
    pub fn new(code: WebKdcErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for WebKdcFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.code.code(), self.message)
    }
}

impl std::error::Error for WebKdcFault {}

/// Logs `fault` at the appropriate tier: fatal/internal errors always log at
/// `error!` with call-site info; user-caused errors (bad password, stale token,
/// malformed request) log only when `debug` is enabled, to avoid flooding logs from
/// hostile or broken clients.
#[track_caller]
pub fn log_fault(fault: &WebKdcFault, debug: bool) {
    if fault.code.is_user_caused() {
        if debug {
            let location = core::panic::Location::caller();
            tracing::debug!(code = fault.code.code(), message = %fault.message, %location, "request failed");
        }
    } else {
        let location = core::panic::Location::caller();
        tracing::error!(code = fault.code.code(), message = %fault.message, %location, "request failed");
    }
}

/// Maps a [`crate::token::TokenError`] into the kind-specific invalid/expired/stale
/// code from the `{service,proxy,request,login}_token_{invalid,expired,stale}` family.
pub fn classify_token_error(kind: TokenKind, err: &crate::token::TokenError) -> WebKdcErrorCode {
    use crate::token::TokenError;

    match (kind, err) {
        (_, TokenError::Expired) => kind.expired_code(),
        (TokenKind::Request | TokenKind::Login, TokenError::Stale) => kind.stale_code().unwrap_or(kind.invalid_code()),
        _ => kind.invalid_code(),
    }
}

/// Which token family a codec failure occurred against, for [`classify_token_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Service,
    Proxy,
    Request,
    Login,
}

impl TokenKind {
    const fn invalid_code(self) -> WebKdcErrorCode {
        match self {
            Self::Service => WebKdcErrorCode::ServiceTokenInvalid,
            Self::Proxy => WebKdcErrorCode::ProxyTokenInvalid,
            Self::Request => WebKdcErrorCode::RequestTokenInvalid,
            Self::Login => WebKdcErrorCode::LoginTokenInvalid,
        }
    }

    const fn expired_code(self) -> WebKdcErrorCode {
        match self {
            Self::Service => WebKdcErrorCode::ServiceTokenExpired,
            Self::Proxy => WebKdcErrorCode::ProxyTokenExpired,
            Self::Request => WebKdcErrorCode::RequestTokenExpired,
            // Login tokens carry no absolute expiration field, only a TTL.
            Self::Login => WebKdcErrorCode::LoginTokenInvalid,
        }
    }

    const fn stale_code(self) -> Option<WebKdcErrorCode> {
        match self {
            Self::Request => Some(WebKdcErrorCode::RequestTokenStale),
            Self::Login => Some(WebKdcErrorCode::LoginTokenStale),
            Self::Service | Self::Proxy => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenError;

    #[test]
    fn stale_request_token_maps_to_request_token_stale() {
        let code = classify_token_error(TokenKind::Request, &TokenError::Stale);
        assert_eq!(code, WebKdcErrorCode::RequestTokenStale);
    }

    #[test]
    fn bad_hmac_maps_to_the_kind_specific_invalid_code() {
        let code = classify_token_error(TokenKind::Service, &TokenError::BadHmac);
        assert_eq!(code, WebKdcErrorCode::ServiceTokenInvalid);
    }

    #[test]
    fn expired_proxy_token_maps_to_proxy_token_expired() {
        let code = classify_token_error(TokenKind::Proxy, &TokenError::Expired);
        assert_eq!(code, WebKdcErrorCode::ProxyTokenExpired);
    }

    #[test]
    fn user_caused_codes_exclude_only_the_internal_pair() {
        assert!(!WebKdcErrorCode::ServerFailure.is_user_caused());
        assert!(!WebKdcErrorCode::GetCredFailure.is_user_caused());
        assert!(WebKdcErrorCode::InvalidRequest.is_user_caused());
        assert!(WebKdcErrorCode::LoginFailed.is_user_caused());
    }
}
