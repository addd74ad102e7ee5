//! Login pipeline: atomic password → TGT → webkdc-proxy-token conversion.

use crate::krb5::{classify::classify_init_error, Krb5Adapter, Krb5Error, LoginFailureClass};
use crate::token::kinds::WebkdcProxyTokenBuilder;
use crate::token::{self, TokenError};

/// The outcome of a successful login: the freshly minted webkdc-proxy token
/// (encrypted under the keyring's current key) plus the subject it names, so the
/// caller can fold it into the response/compatibility-matrix logic without
/// re-decrypting the token it just created.
#[derive(Debug, Clone)]
pub struct LoginResult {
    pub webkdc_proxy_token: Vec<u8>,
    pub subject: String,
    pub proxy_subject: String,
    pub expiration: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    /// Bad password, unknown principal, or similar client-caused failure —
    /// folds into `login_failed`.
    #[error("login failed: {0}")]
    Failed(String),
    /// Anything else (KDC unreachable, keytab unreadable) — `server_failure`.
    #[error("kerberos operation failed: {0}")]
    Server(String),
    #[error("no signing key is currently available")]
    NoSigningKey,
}

/// Performs the atomic `mwk_do_login` sequence: obtain and verify a TGT via
/// password, resolve the canonical (local-name-converted) subject, export the TGT,
/// and mint a webkdc-proxy token for it. Any failure midway aborts the whole
/// sequence — there is no partial credential left live in `adapter` that a caller
/// could mistakenly reuse, since `adapter` is always request-scoped.
pub async fn do_login(
    adapter: &mut dyn Krb5Adapter,
    username: &str,
    password: &str,
    keytab: &str,
    now: i64,
    proxy_token_max_lifetime: Option<i64>,
    signing_key: Option<&crate::keyring::Key>,
) -> Result<LoginResult, LoginError> {
    let server_principal = adapter
        .init_via_password(username, password, keytab, None)
        .await
        .map_err(classify_login_error)?;

    let subject = adapter
        .get_principal(true)
        .await
        .map_err(|err| LoginError::Server(err.to_string()))?;

    let exported = adapter
        .export_tgt()
        .await
        .map_err(|err| LoginError::Server(err.to_string()))?;

    let expiration = match proxy_token_max_lifetime {
        Some(max_lifetime) => exported.expiration.min(now + max_lifetime),
        None => exported.expiration,
    };

    let key = signing_key.ok_or(LoginError::NoSigningKey)?;
    let attrs = WebkdcProxyTokenBuilder::new()
        .subject(subject.clone())
        .proxy_subject(server_principal.clone())
        .proxy_type("krb5")
        .proxy_data(exported.blob)
        .build(now, expiration);

    let webkdc_proxy_token = token::create_with_key(attrs, "webkdc-proxy", now, now, &key.bytes);

    Ok(LoginResult {
        webkdc_proxy_token,
        subject,
        proxy_subject: server_principal,
        expiration,
    })
}

fn classify_login_error(err: Krb5Error) -> LoginError {
    match classify_init_error(&err) {
        LoginFailureClass::LoginFailed => LoginError::Failed(err.to_string()),
        LoginFailureClass::Krb5 => LoginError::Server(err.to_string()),
    }
}

/// Re-decodes a webkdc-proxy token this process just minted, mostly for tests that
/// want to assert on the plaintext contents of [`LoginResult::webkdc_proxy_token`].
pub fn decode_webkdc_proxy_token(token: &[u8], key: &crate::keyring::KeyBytes) -> Result<crate::attr::AttributeList, TokenError> {
    token::parse_with_key(token, 0, i64::MAX, key)
}
