//! Typed builders and views over [`AttributeList`] for each token kind.
//!
//! Builders are consuming and `#[must_use]`: every required attribute must be supplied
//! before `build()` is callable, so a caller cannot forget one. Views are constructed
//! from a decoded [`AttributeList`] and validate that every required attribute is
//! present, giving typed accessors over the otherwise untyped bag of bytes.

use crate::attr::{AttrError, AttributeList};

#[derive(Debug, thiserror::Error)]
pub enum KindError {
    #[error(transparent)]
    Attr(#[from] AttrError),
    #[error("expected token kind `{expected}`, found `{found}`")]
    WrongKind { expected: &'static str, found: String },
}

fn check_kind(attrs: &AttributeList, expected: &'static str) -> Result<(), KindError> {
    let found = attrs.get_str("t")?;
    if found != expected {
        return Err(KindError::WrongKind {
            expected,
            found: found.to_owned(),
        });
    }
    Ok(())
}

macro_rules! token_view {
    ($view:ident, $kind:literal, { $($field:ident : $name:literal),+ $(,)? } $(, optional { $($ofield:ident : $oname:literal),+ $(,)? })?) => {
        #[derive(Debug, Clone)]
        pub struct $view {
            $(pub $field: String,)+
            $($(pub $ofield: Option<String>,)+)?
        }

        impl $view {
            pub fn from_attrs(attrs: &AttributeList) -> Result<Self, KindError> {
                check_kind(attrs, $kind)?;
                Ok(Self {
                    $($field: attrs.get_str($name)?.to_owned(),)+
                    $($($ofield: attrs.get(($oname)).map(|_| attrs.get_str($oname)).transpose()?.map(str::to_owned),)+)?
                })
            }
        }
    };
}

// webkdc-service
token_view!(ServiceTokenView, "webkdc-service", {
    subject: "s",
});

impl ServiceTokenView {
    /// The raw 16-byte session key. Not exposed as a `String` field like the other
    /// attributes — it is arbitrary binary, not guaranteed valid UTF-8.
    pub fn session_key(attrs: &AttributeList) -> Result<&[u8], KindError> {
        attrs.get("k").ok_or_else(|| KindError::Attr(AttrError::Missing("k".into())))
    }
}

#[derive(Debug, Default)]
#[must_use]
pub struct ServiceTokenBuilder {
    subject: Option<String>,
    session_key: Option<[u8; 16]>,
}

impl ServiceTokenBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn session_key(mut self, key: [u8; 16]) -> Self {
        self.session_key = Some(key);
        self
    }

    pub fn build(self, created_at: i64, expires_at: i64) -> AttributeList {
        let mut attrs = AttributeList::new();
        attrs.add_str("t", "webkdc-service");
        attrs.add_str("s", self.subject.expect("subject is required"));
        attrs.add(
            "k",
            self.session_key.expect("session_key is required").to_vec(),
        );
        attrs.add_time("ct", created_at);
        attrs.add_time("et", expires_at);
        attrs
    }
}

// webkdc-proxy
token_view!(WebkdcProxyTokenView, "webkdc-proxy", {
    subject: "s",
    proxy_subject: "ps",
    proxy_type: "pt",
});

#[derive(Debug, Default)]
#[must_use]
pub struct WebkdcProxyTokenBuilder {
    subject: Option<String>,
    proxy_subject: Option<String>,
    proxy_type: Option<String>,
    proxy_data: Option<Vec<u8>>,
}

impl WebkdcProxyTokenBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn proxy_subject(mut self, proxy_subject: impl Into<String>) -> Self {
        self.proxy_subject = Some(proxy_subject.into());
        self
    }

    pub fn proxy_type(mut self, proxy_type: impl Into<String>) -> Self {
        self.proxy_type = Some(proxy_type.into());
        self
    }

    pub fn proxy_data(mut self, proxy_data: impl Into<Vec<u8>>) -> Self {
        self.proxy_data = Some(proxy_data.into());
        self
    }

    pub fn build(self, created_at: i64, expires_at: i64) -> AttributeList {
        let mut attrs = AttributeList::new();
        attrs.add_str("t", "webkdc-proxy");
        attrs.add_str("s", self.subject.expect("subject is required"));
        attrs.add_str("ps", self.proxy_subject.expect("proxy_subject is required"));
        attrs.add_str("pt", self.proxy_type.expect("proxy_type is required"));
        attrs.add("pd", self.proxy_data.expect("proxy_data is required"));
        attrs.add_time("ct", created_at);
        attrs.add_time("et", expires_at);
        attrs
    }
}

impl WebkdcProxyTokenView {
    pub fn proxy_data(attrs: &AttributeList) -> Result<&[u8], KindError> {
        attrs.get("pd").ok_or_else(|| KindError::Attr(AttrError::Missing("pd".into())))
    }
}

// proxy
token_view!(ProxyTokenView, "proxy", {
    subject: "s",
    proxy_type: "pt",
});

impl ProxyTokenView {
    /// The raw wrapped webkdc-proxy token bytes.
    pub fn wrapped_webkdc_proxy(attrs: &AttributeList) -> Result<&[u8], KindError> {
        attrs.get("wt").ok_or_else(|| KindError::Attr(AttrError::Missing("wt".into())))
    }
}

#[derive(Debug, Default)]
#[must_use]
pub struct ProxyTokenBuilder {
    subject: Option<String>,
    proxy_type: Option<String>,
    wrapped_webkdc_proxy: Option<Vec<u8>>,
}

impl ProxyTokenBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn proxy_type(mut self, proxy_type: impl Into<String>) -> Self {
        self.proxy_type = Some(proxy_type.into());
        self
    }

    pub fn wrapped_webkdc_proxy(mut self, token: impl Into<Vec<u8>>) -> Self {
        self.wrapped_webkdc_proxy = Some(token.into());
        self
    }

    pub fn build(self, created_at: i64, expires_at: i64) -> AttributeList {
        let mut attrs = AttributeList::new();
        attrs.add_str("t", "proxy");
        attrs.add_str("s", self.subject.expect("subject is required"));
        attrs.add_str("pt", self.proxy_type.expect("proxy_type is required"));
        attrs.add(
            "wt",
            self.wrapped_webkdc_proxy.expect("wrapped_webkdc_proxy is required"),
        );
        attrs.add_time("ct", created_at);
        attrs.add_time("et", expires_at);
        attrs
    }
}

// cred
token_view!(CredTokenView, "cred", {
    subject: "s",
    cred_type: "crt",
});

impl CredTokenView {
    /// The raw, kind-specific credential blob (e.g. a marshaled service ticket).
    pub fn cred_data(attrs: &AttributeList) -> Result<&[u8], KindError> {
        attrs.get("crd").ok_or_else(|| KindError::Attr(AttrError::Missing("crd".into())))
    }
}

#[derive(Debug, Default)]
#[must_use]
pub struct CredTokenBuilder {
    subject: Option<String>,
    cred_type: Option<String>,
    cred_data: Option<Vec<u8>>,
}

impl CredTokenBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn cred_type(mut self, cred_type: impl Into<String>) -> Self {
        self.cred_type = Some(cred_type.into());
        self
    }

    pub fn cred_data(mut self, cred_data: impl Into<Vec<u8>>) -> Self {
        self.cred_data = Some(cred_data.into());
        self
    }

    pub fn build(self, created_at: i64, expires_at: i64) -> AttributeList {
        let mut attrs = AttributeList::new();
        attrs.add_str("t", "cred");
        attrs.add_str("s", self.subject.expect("subject is required"));
        attrs.add_str("crt", self.cred_type.expect("cred_type is required"));
        attrs.add("crd", self.cred_data.expect("cred_data is required"));
        attrs.add_time("ct", created_at);
        attrs.add_time("et", expires_at);
        attrs
    }
}

// id
token_view!(IdTokenView, "id", { subject_auth: "sa" }, optional { subject: "s" });

impl IdTokenView {
    /// The raw subject authentication data (typically an AP-REQ), if present. Not a
    /// macro-generated `String` field — `sad` is arbitrary binary.
    pub fn subject_auth_data(attrs: &AttributeList) -> Option<&[u8]> {
        attrs.get("sad")
    }
}

#[derive(Debug, Default)]
#[must_use]
pub struct IdTokenBuilder {
    subject_auth: Option<String>,
    subject: Option<String>,
    subject_auth_data: Option<Vec<u8>>,
}

impl IdTokenBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subject_auth(mut self, subject_auth: impl Into<String>) -> Self {
        self.subject_auth = Some(subject_auth.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn subject_auth_data(mut self, sad: impl Into<Vec<u8>>) -> Self {
        self.subject_auth_data = Some(sad.into());
        self
    }

    pub fn build(self, created_at: i64, expires_at: i64) -> AttributeList {
        let mut attrs = AttributeList::new();
        attrs.add_str("t", "id");
        attrs.add_str("sa", self.subject_auth.expect("subject_auth is required"));
        if let Some(subject) = self.subject {
            attrs.add_str("s", subject);
        }
        if let Some(sad) = self.subject_auth_data {
            attrs.add("sad", sad);
        }
        attrs.add_time("ct", created_at);
        attrs.add_time("et", expires_at);
        attrs
    }
}

/// A parsed `req` (request) token: either a session-binding command, or a full
/// end-user-agent intent. These are mutually exclusive shapes sharing the same
/// token kind.
#[derive(Debug, Clone)]
pub enum RequestTokenView {
    /// Binds a `getTokensRequest` call to the service token's session key.
    Command { command: String },
    /// The full end-user-agent request for a token.
    Intent {
        requested_token_type: String,
        return_url: String,
        request_options: String,
        subject_auth_or_proxy_type: String,
        app_state: Option<Vec<u8>>,
    },
}

impl RequestTokenView {
    pub fn from_attrs(attrs: &AttributeList) -> Result<Self, KindError> {
        check_kind(attrs, "req")?;

        if let Ok(command) = attrs.get_str("cmd") {
            return Ok(Self::Command {
                command: command.to_owned(),
            });
        }

        Ok(Self::Intent {
            requested_token_type: attrs.get_str("rtt")?.to_owned(),
            return_url: attrs.get_str("ru")?.to_owned(),
            request_options: attrs.get_str("ro").unwrap_or_default().to_owned(),
            subject_auth_or_proxy_type: attrs.get_str("sa").or_else(|_| attrs.get_str("pt"))?.to_owned(),
            app_state: attrs.get("as").map(<[u8]>::to_vec),
        })
    }

    /// Whether `request_options` (on an [`Self::Intent`]) contains the named option.
    pub fn has_option(&self, option: &str) -> bool {
        match self {
            Self::Intent { request_options, .. } => request_options.split(' ').any(|o| o == option),
            Self::Command { .. } => false,
        }
    }
}

#[derive(Debug, Default)]
#[must_use]
pub struct RequestTokenBuilder;

impl RequestTokenBuilder {
    pub fn command(command: impl Into<String>, created_at: i64, expires_at: i64) -> AttributeList {
        let mut attrs = AttributeList::new();
        attrs.add_str("t", "req");
        attrs.add_str("cmd", command.into());
        attrs.add_time("ct", created_at);
        attrs.add_time("et", expires_at);
        attrs
    }

    #[expect(clippy::too_many_arguments, reason = "mirrors the wire shape's flat attribute set")]
    pub fn intent(
        requested_token_type: impl Into<String>,
        return_url: impl Into<String>,
        request_options: impl Into<String>,
        subject_auth_or_proxy_type: impl Into<String>,
        app_state: Option<Vec<u8>>,
        created_at: i64,
        expires_at: i64,
    ) -> AttributeList {
        let mut attrs = AttributeList::new();
        attrs.add_str("t", "req");
        attrs.add_str("rtt", requested_token_type.into());
        attrs.add_str("ru", return_url.into());
        attrs.add_str("ro", request_options.into());
        attrs.add_str("sa", subject_auth_or_proxy_type.into());
        if let Some(app_state) = app_state {
            attrs.add("as", app_state);
        }
        attrs.add_time("ct", created_at);
        attrs.add_time("et", expires_at);
        attrs
    }
}

// login
token_view!(LoginTokenView, "login", {
    username: "u",
    password: "p",
});

#[derive(Debug, Default)]
#[must_use]
pub struct LoginTokenBuilder {
    username: Option<String>,
    password: Option<String>,
}

impl LoginTokenBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn build(self, created_at: i64) -> AttributeList {
        let mut attrs = AttributeList::new();
        attrs.add_str("t", "login");
        attrs.add_str("u", self.username.expect("username is required"));
        attrs.add_str("p", self.password.expect("password is required"));
        attrs.add_time("ct", created_at);
        attrs
    }
}

// error
token_view!(ErrorTokenView, "error", {
    error_code: "ec",
    error_message: "em",
});

#[derive(Debug, Default)]
#[must_use]
pub struct ErrorTokenBuilder {
    error_code: Option<String>,
    error_message: Option<String>,
}

impl ErrorTokenBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn build(self, created_at: i64) -> AttributeList {
        let mut attrs = AttributeList::new();
        attrs.add_str("t", "error");
        attrs.add_str("ec", self.error_code.expect("error_code is required"));
        attrs.add_str("em", self.error_message.expect("error_message is required"));
        attrs.add_time("ct", created_at);
        attrs
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "test code, panics are expected")]
mod tests {
    use super::*;

    #[test]
    fn service_token_round_trips() {
        let attrs = ServiceTokenBuilder::new()
            .subject("alice@EXAMPLE.ORG")
            .session_key([7u8; 16])
            .build(1_000, 10_000);

        let view = ServiceTokenView::from_attrs(&attrs).unwrap();
        assert_eq!(view.subject, "alice@EXAMPLE.ORG");
    }

    #[test]
    fn webkdc_proxy_token_round_trips() {
        let attrs = WebkdcProxyTokenBuilder::new()
            .subject("alice@EXAMPLE.ORG")
            .proxy_subject("webkdc/server@EXAMPLE.ORG")
            .proxy_type("krb5")
            .proxy_data(vec![1, 2, 3])
            .build(1_000, 10_000);

        let view = WebkdcProxyTokenView::from_attrs(&attrs).unwrap();
        assert_eq!(view.proxy_subject, "webkdc/server@EXAMPLE.ORG");
        assert_eq!(WebkdcProxyTokenView::proxy_data(&attrs).unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let attrs = LoginTokenBuilder::new()
            .username("alice")
            .password("hunter2")
            .build(1_000);

        assert!(matches!(
            ServiceTokenView::from_attrs(&attrs),
            Err(KindError::WrongKind { .. })
        ));
    }

    #[test]
    fn request_token_intent_reads_options() {
        let attrs = RequestTokenBuilder::intent("id", "https://app.example/", "fa lc", "webkdc", None, 1_000, 10_000);
        let view = RequestTokenView::from_attrs(&attrs).unwrap();
        assert!(view.has_option("fa"));
        assert!(view.has_option("lc"));
        assert!(!view.has_option("xx"));
    }

    #[test]
    fn request_token_command_variant() {
        let attrs = RequestTokenBuilder::command("getTokensRequest", 1_000, 10_000);
        let view = RequestTokenView::from_attrs(&attrs).unwrap();
        assert!(matches!(view, RequestTokenView::Command { command } if command == "getTokensRequest"));
    }

    #[test]
    fn id_token_optional_fields_round_trip() {
        let attrs = IdTokenBuilder::new()
            .subject_auth("krb5")
            .subject("alice@EXAMPLE.ORG")
            .build(1_000, 10_000);

        let view = IdTokenView::from_attrs(&attrs).unwrap();
        assert_eq!(view.subject.as_deref(), Some("alice@EXAMPLE.ORG"));
        assert_eq!(IdTokenView::subject_auth_data(&attrs), None);
    }

    #[test]
    fn service_token_session_key_is_read_as_raw_bytes() {
        let attrs = ServiceTokenBuilder::new()
            .subject("alice@EXAMPLE.ORG")
            .session_key([0xffu8; 16])
            .build(1_000, 10_000);

        assert_eq!(ServiceTokenView::session_key(&attrs).unwrap(), &[0xffu8; 16]);
    }
}
