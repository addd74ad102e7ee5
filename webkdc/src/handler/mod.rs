//! Request handler: `getTokensRequest`/`requestTokenRequest` dispatch, the requester
//! × subject × requested-token compatibility matrix, and the `requestTokenRequest`
//! login state machine.
//!
//! XML shaping is purely mechanical and lives in [`crate::xml`]; this module is
//! where the actual dispatch logic sits.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::config::Conf;
use crate::error::{classify_token_error, log_fault, TokenKind, WebKdcErrorCode, WebKdcFault};
use crate::keyring::{KeyBytes, KeyringHandle};
use crate::krb5::Krb5Adapter;
use crate::login;
use crate::token::{
    self,
    kinds::{
        CredTokenBuilder, ErrorTokenBuilder, IdTokenBuilder, LoginTokenView, ProxyTokenBuilder, RequestTokenView,
        ServiceTokenBuilder, WebkdcProxyTokenBuilder, WebkdcProxyTokenView,
    },
};
use crate::xml::request::{GetTokensRequest, RequesterCredentialXml, RequestTokenRequest, SubjectCredentialXml, TokenRequestXml};
use crate::xml::response::{GetTokensResponseXml, ProxyTokenXml, ProxyTokensResponseXml, RequestTokenResponseXml, TokenResponseXml, TokensResponseXml};

/// Cap on `<token>` children accepted in one `getTokensRequest`.
const MAX_TOKENS_RETURNED: usize = 10;

/// A verified requester identity (`requesterCredential`).
///
/// Tagged enum over the two `type="…"` variants the wire format distinguishes,
/// matched exhaustively at every call site in place of a `type` string compare.
#[derive(Debug, Clone)]
pub enum RequesterCredential {
    /// A service authenticating itself directly via AP-REQ, to obtain its own
    /// service token. `client_principal` is the identity `rd_req` verified.
    Krb5 { client_principal: String },
    /// An already-issued service token, presented to request further tokens.
    Service { subject: String, session_key: [u8; 16] },
}

/// A verified subject credential (`subjectCredential`).
#[derive(Debug, Clone)]
pub enum SubjectCredential {
    /// One or more webkdc-proxy tokens (keyring-encrypted), established by a prior
    /// login.
    Proxy { webkdc_proxy_tokens: Vec<Vec<u8>> },
    /// A login token (keyring-encrypted, TTL-bound) carrying a username/password.
    Login { login_token: Vec<u8> },
}

/// A stub authorization hook: the call site and failure path exist and are tested,
/// without pretending a directory/ACL integration exists.
pub trait PolicyHook: Send + Sync {
    fn authorize(&self, requester: &str, action: RequestedToken) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedToken {
    Service,
    Id,
    Proxy,
    Cred,
}

/// The only [`PolicyHook`] implementation in this repository. Always permits, pending
/// a real directory/ACL integration.
pub struct AllowAllPolicy;

impl PolicyHook for AllowAllPolicy {
    fn authorize(&self, _requester: &str, _action: RequestedToken) -> bool {
        true
    }
}

fn check_authorized(policy: &dyn PolicyHook, requester: &str, action: RequestedToken) -> Result<(), WebKdcFault> {
    if policy.authorize(requester, action) {
        Ok(())
    } else {
        Err(WebKdcFault::new(
            WebKdcErrorCode::Unauthorized,
            format!("{requester} is not authorized to request a {action:?} token"),
        ))
    }
}

fn decode_base64(field: &str, data: &str) -> Result<Vec<u8>, WebKdcFault> {
    BASE64
        .decode(data.trim())
        .map_err(|_| WebKdcFault::new(WebKdcErrorCode::InvalidRequest, format!("`{field}` is not valid base64")))
}

/// Verifies a `<requesterCredential>` and returns the identity it establishes.
pub async fn decode_requester_credential(
    adapter: &mut dyn Krb5Adapter,
    keyring: &KeyringHandle,
    conf: &Conf,
    now: i64,
    xml: &RequesterCredentialXml,
) -> Result<RequesterCredential, WebKdcFault> {
    match xml.kind.as_str() {
        "krb5" => {
            let sad = decode_base64("requesterCredential", &xml.data)?;
            let client_principal = adapter
                .rd_req(&sad, conf.keytab_path.as_str(), &conf.principal)
                .await
                .map_err(|err| WebKdcFault::new(WebKdcErrorCode::RequesterKrb5CredInvalid, err.to_string()))?;
            Ok(RequesterCredential::Krb5 { client_principal })
        }
        "service" => {
            let token_bytes = decode_base64("requesterCredential", &xml.data)?;
            let keys = keyring.all_keys(now);
            let attrs = token::parse(&token_bytes, 0, now, keys.iter())
                .map_err(|err| WebKdcFault::new(classify_token_error(TokenKind::Service, &err), err.to_string()))?;
            let subject = attrs
                .get_str("s")
                .map_err(|err| WebKdcFault::new(WebKdcErrorCode::ServiceTokenInvalid, err.to_string()))?
                .to_owned();
            let key_bytes = attrs
                .get("k")
                .ok_or_else(|| WebKdcFault::new(WebKdcErrorCode::ServiceTokenInvalid, "service token is missing its session key"))?;
            let session_key: [u8; 16] = key_bytes
                .try_into()
                .map_err(|_| WebKdcFault::new(WebKdcErrorCode::ServiceTokenInvalid, "service token session key has the wrong length"))?;
            Ok(RequesterCredential::Service { subject, session_key })
        }
        other => Err(WebKdcFault::new(WebKdcErrorCode::InvalidRequest, format!("unknown requester credential type `{other}`"))),
    }
}

/// Decodes a `<subjectCredential>` envelope, without yet verifying the inner tokens —
/// that happens once we know which `proxy_type`/requested kind needs them.
pub fn decode_subject_credential(xml: &SubjectCredentialXml) -> Result<SubjectCredential, WebKdcFault> {
    match xml.kind.as_str() {
        "proxy" => {
            let webkdc_proxy_tokens = xml
                .proxy_tokens
                .iter()
                .map(|data| decode_base64("proxyToken", data))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(SubjectCredential::Proxy { webkdc_proxy_tokens })
        }
        "login" => {
            let data = xml
                .login_token
                .as_deref()
                .ok_or_else(|| WebKdcFault::new(WebKdcErrorCode::InvalidRequest, "login subject credential is missing loginToken"))?;
            Ok(SubjectCredential::Login {
                login_token: decode_base64("loginToken", data)?,
            })
        }
        other => Err(WebKdcFault::new(WebKdcErrorCode::InvalidRequest, format!("unknown subject credential type `{other}`"))),
    }
}

/// A subject's webkdc-proxy credential, decrypted and validated, carrying everything
/// the compatibility matrix's id/proxy/cred issuance needs.
#[derive(Debug, Clone)]
struct ProxySubject {
    subject: String,
    proxy_data: Vec<u8>,
    expiration: i64,
}

/// Finds and decrypts the subject's webkdc-proxy token of the given `proxy_type`
/// among the credentials a `proxy`-kind [`SubjectCredential`] carries.
fn find_proxy_subject(subject: Option<&SubjectCredential>, keyring: &KeyringHandle, now: i64, proxy_type: &str) -> Result<ProxySubject, WebKdcFault> {
    let Some(SubjectCredential::Proxy { webkdc_proxy_tokens }) = subject else {
        return Err(WebKdcFault::new(
            WebKdcErrorCode::ProxyTokenRequired,
            format!("issuance requires a subject proxy credential of type `{proxy_type}`"),
        ));
    };

    let keys = keyring.all_keys(now);
    for token_bytes in webkdc_proxy_tokens {
        let Ok(attrs) = token::parse(token_bytes, 0, now, keys.iter()) else {
            continue;
        };
        let Ok(view) = WebkdcProxyTokenView::from_attrs(&attrs) else {
            continue;
        };
        if view.proxy_type != proxy_type {
            continue;
        }
        let proxy_data = WebkdcProxyTokenView::proxy_data(&attrs)
            .map_err(|err| WebKdcFault::new(WebKdcErrorCode::ProxyTokenInvalid, err.to_string()))?
            .to_vec();
        let expiration = attrs
            .get_time("et")
            .map_err(|err| WebKdcFault::new(WebKdcErrorCode::ProxyTokenInvalid, err.to_string()))?;
        return Ok(ProxySubject {
            subject: view.subject,
            proxy_data,
            expiration,
        });
    }

    Err(WebKdcFault::new(
        WebKdcErrorCode::ProxyTokenRequired,
        format!("no subject proxy of type `{proxy_type}` was supplied"),
    ))
}

fn decode_request_token_view(request_token_b64: &str, session_key: &[u8; 16], token_max_ttl: i64, now: i64) -> Result<RequestTokenView, WebKdcFault> {
    let bytes = decode_base64("requestToken", request_token_b64)?;
    let attrs = token::parse_with_key(&bytes, token_max_ttl, now, &KeyBytes::new(*session_key))
        .map_err(|err| WebKdcFault::new(classify_token_error(TokenKind::Request, &err), err.to_string()))?;
    RequestTokenView::from_attrs(&attrs).map_err(|err| WebKdcFault::new(WebKdcErrorCode::RequestTokenInvalid, err.to_string()))
}

/// Verifies that a `getTokensRequest`'s `<requestToken>` binds the call to the
/// requester's session key.
fn check_command_binding(session_key: &[u8; 16], request_token_b64: Option<&str>, token_max_ttl: i64, now: i64) -> Result<(), WebKdcFault> {
    let Some(b64) = request_token_b64 else {
        return Err(WebKdcFault::new(
            WebKdcErrorCode::RequestTokenInvalid,
            "a requestToken binding this call to the session key is required",
        ));
    };
    match decode_request_token_view(b64, session_key, token_max_ttl, now)? {
        RequestTokenView::Command { command } if command == "getTokensRequest" => Ok(()),
        _ => Err(WebKdcFault::new(
            WebKdcErrorCode::RequestTokenInvalid,
            "requestToken does not bind a getTokensRequest command",
        )),
    }
}

fn mint_service_token(policy: &dyn PolicyHook, keyring: &KeyringHandle, conf: &Conf, now: i64, client_principal: &str) -> Result<Vec<u8>, WebKdcFault> {
    check_authorized(policy, client_principal, RequestedToken::Service)?;

    let key = keyring
        .current_key(now)
        .ok_or_else(|| WebKdcFault::new(WebKdcErrorCode::ServerFailure, "no signing key is currently available"))?;

    let mut session_key = [0u8; 16];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut session_key);

    let lifetime = conf.service_token_lifetime.as_secs() as i64;
    let attrs = ServiceTokenBuilder::new()
        .subject(client_principal)
        .session_key(session_key)
        .build(now, now + lifetime);

    Ok(token::create_with_key(attrs, "webkdc-service", now, now, &key.bytes))
}

async fn mint_id_token(
    adapter: &mut dyn Krb5Adapter,
    policy: &dyn PolicyHook,
    session_key: &[u8; 16],
    now: i64,
    requester_subject: &str,
    auth_kind: &str,
    proxy: &ProxySubject,
) -> Result<Vec<u8>, WebKdcFault> {
    check_authorized(policy, requester_subject, RequestedToken::Id)?;

    let builder = IdTokenBuilder::new().subject(proxy.subject.clone());
    let attrs = match auth_kind {
        "webkdc" => builder.subject_auth("webkdc").build(now, proxy.expiration),
        "krb5" => {
            adapter
                .init_via_tgt(&proxy.proxy_data)
                .await
                .map_err(|err| WebKdcFault::new(WebKdcErrorCode::ServerFailure, err.to_string()))?;
            let sad = adapter
                .mk_req(requester_subject)
                .await
                .map_err(|err| WebKdcFault::new(WebKdcErrorCode::GetCredFailure, err.to_string()))?;
            builder.subject_auth("krb5").subject_auth_data(sad).build(now, proxy.expiration)
        }
        other => return Err(WebKdcFault::new(WebKdcErrorCode::InvalidRequest, format!("unsupported id authenticator type `{other}`"))),
    };

    Ok(token::create_with_key(attrs, "id", now, now, &KeyBytes::new(*session_key)))
}

fn mint_proxy_token(
    policy: &dyn PolicyHook,
    keyring: &KeyringHandle,
    session_key: &[u8; 16],
    now: i64,
    requester_subject: &str,
    proxy_type: &str,
    proxy: &ProxySubject,
) -> Result<Vec<u8>, WebKdcFault> {
    check_authorized(policy, requester_subject, RequestedToken::Proxy)?;

    let key = keyring
        .current_key(now)
        .ok_or_else(|| WebKdcFault::new(WebKdcErrorCode::ServerFailure, "no signing key is currently available"))?;

    let webkdc_proxy_attrs = WebkdcProxyTokenBuilder::new()
        .subject(proxy.subject.clone())
        .proxy_subject(requester_subject)
        .proxy_type(proxy_type)
        .proxy_data(proxy.proxy_data.clone())
        .build(now, proxy.expiration);
    let wrapped = token::create_with_key(webkdc_proxy_attrs, "webkdc-proxy", now, now, &key.bytes);

    let attrs = ProxyTokenBuilder::new()
        .subject(proxy.subject.clone())
        .proxy_type(proxy_type)
        .wrapped_webkdc_proxy(wrapped)
        .build(now, proxy.expiration);

    Ok(token::create_with_key(attrs, "proxy", now, now, &KeyBytes::new(*session_key)))
}

async fn mint_cred_token(
    adapter: &mut dyn Krb5Adapter,
    policy: &dyn PolicyHook,
    session_key: &[u8; 16],
    now: i64,
    requester_subject: &str,
    credential_type: &str,
    server_principal: &str,
    proxy: &ProxySubject,
) -> Result<Vec<u8>, WebKdcFault> {
    check_authorized(policy, requester_subject, RequestedToken::Cred)?;

    if credential_type != "krb5" {
        return Err(WebKdcFault::new(WebKdcErrorCode::InvalidRequest, format!("unsupported credential type `{credential_type}`")));
    }

    adapter
        .init_via_tgt(&proxy.proxy_data)
        .await
        .map_err(|err| WebKdcFault::new(WebKdcErrorCode::ServerFailure, err.to_string()))?;
    let ticket = adapter
        .export_ticket(server_principal)
        .await
        .map_err(|err| WebKdcFault::new(WebKdcErrorCode::GetCredFailure, err.to_string()))?;

    let expiration = ticket.expiration.min(proxy.expiration);
    let attrs = CredTokenBuilder::new()
        .subject(proxy.subject.clone())
        .cred_type("krb5")
        .cred_data(ticket.blob)
        .build(now, expiration);

    Ok(token::create_with_key(attrs, "cred", now, now, &KeyBytes::new(*session_key)))
}

async fn issue_one_token(
    adapter: &mut dyn Krb5Adapter,
    policy: &dyn PolicyHook,
    keyring: &KeyringHandle,
    conf: &Conf,
    now: i64,
    requester: &RequesterCredential,
    subject: Option<&SubjectCredential>,
    token_request: &TokenRequestXml,
) -> Result<Vec<u8>, WebKdcFault> {
    match token_request.kind.as_str() {
        "service" => {
            let RequesterCredential::Krb5 { client_principal } = requester else {
                return Err(WebKdcFault::new(
                    WebKdcErrorCode::InvalidRequest,
                    "a service token may only be requested by a krb5 (AP-REQ) requester",
                ));
            };
            mint_service_token(policy, keyring, conf, now, client_principal)
        }
        "id" => {
            let RequesterCredential::Service { subject: requester_subject, session_key } = requester else {
                return Err(WebKdcFault::new(
                    WebKdcErrorCode::InvalidRequest,
                    "an id token may only be requested by a service requester",
                ));
            };
            let auth = token_request
                .authenticator
                .as_ref()
                .ok_or_else(|| WebKdcFault::new(WebKdcErrorCode::InvalidRequest, "an id token request requires an <authenticator>"))?;
            let proxy = find_proxy_subject(subject, keyring, now, "krb5")?;
            mint_id_token(adapter, policy, session_key, now, requester_subject, &auth.kind, &proxy).await
        }
        "proxy" => {
            let RequesterCredential::Service { subject: requester_subject, session_key } = requester else {
                return Err(WebKdcFault::new(
                    WebKdcErrorCode::InvalidRequest,
                    "a proxy token may only be requested by a service requester",
                ));
            };
            let proxy_type = token_request
                .proxy_type
                .as_deref()
                .ok_or_else(|| WebKdcFault::new(WebKdcErrorCode::InvalidRequest, "a proxy token request requires <proxyType>"))?;
            let proxy = find_proxy_subject(subject, keyring, now, proxy_type)?;
            mint_proxy_token(policy, keyring, session_key, now, requester_subject, proxy_type, &proxy)
        }
        "cred" => {
            let RequesterCredential::Service { subject: requester_subject, session_key } = requester else {
                return Err(WebKdcFault::new(
                    WebKdcErrorCode::InvalidRequest,
                    "a cred token may only be requested by a service requester",
                ));
            };
            let credential_type = token_request.credential_type.as_deref().unwrap_or("krb5");
            let server_principal = token_request
                .server_principal
                .as_deref()
                .ok_or_else(|| WebKdcFault::new(WebKdcErrorCode::InvalidRequest, "a cred token request requires <serverPrincipal>"))?;
            let proxy = find_proxy_subject(subject, keyring, now, "krb5")?;
            mint_cred_token(adapter, policy, session_key, now, requester_subject, credential_type, server_principal, &proxy).await
        }
        other => Err(WebKdcFault::new(WebKdcErrorCode::InvalidRequest, format!("unknown requested token type `{other}`"))),
    }
}

/// Validates and processes a `getTokensRequest`: up to [`MAX_TOKENS_RETURNED`] token
/// requests issued against one shared requester/subject pair. There is no partial
/// success: the first issuance failure aborts the whole batch, and there is no
/// per-slot error-token folding here (only `requestTokenRequest`'s single-token path
/// folds `unauthorized` into an error token).
pub async fn handle_get_tokens_request(
    adapter: &mut dyn Krb5Adapter,
    policy: &dyn PolicyHook,
    keyring: &KeyringHandle,
    conf: &Conf,
    now: i64,
    request: &GetTokensRequest,
) -> Result<GetTokensResponseXml, WebKdcFault> {
    if request.tokens.token.len() > MAX_TOKENS_RETURNED {
        return Err(WebKdcFault::new(
            WebKdcErrorCode::InvalidRequest,
            format!("a getTokensRequest may request at most {MAX_TOKENS_RETURNED} tokens"),
        ));
    }

    let requester = decode_requester_credential(adapter, keyring, conf, now, &request.requester_credential).await?;

    if let RequesterCredential::Service { session_key, .. } = &requester {
        let token_max_ttl = i64::try_from(conf.token_max_ttl.as_secs()).unwrap_or(i64::MAX);
        check_command_binding(session_key, request.request_token.as_deref(), token_max_ttl, now)?;
    }

    let subject = request.subject_credential.as_ref().map(decode_subject_credential).transpose()?;
    if matches!(subject, Some(SubjectCredential::Login { .. })) {
        return Err(WebKdcFault::new(
            WebKdcErrorCode::InvalidRequest,
            "getTokensRequest's subjectCredential must be of type proxy",
        ));
    }

    let mut tokens = Vec::with_capacity(request.tokens.token.len());
    for token_request in &request.tokens.token {
        if token_request.kind != "service" && subject.is_none() {
            return Err(WebKdcFault::new(
                WebKdcErrorCode::InvalidRequest,
                "a subjectCredential is required for any token type other than service",
            ));
        }
        let bytes = issue_one_token(adapter, policy, keyring, conf, now, &requester, subject.as_ref(), token_request).await?;
        tokens.push(TokenResponseXml {
            id: token_request.id.clone(),
            data: BASE64.encode(bytes),
        });
    }

    Ok(GetTokensResponseXml {
        message_id: request.message_id.clone(),
        tokens: TokensResponseXml { token: tokens },
    })
}

/// A subject resolved for a `requestTokenRequest`, either from an already-issued
/// webkdc-proxy credential or freshly minted by the login pipeline.
enum SubjectResolution {
    Proxy {
        proxy: ProxySubject,
        /// `Some` only when this call just ran the login pipeline — the freshly
        /// encrypted webkdc-proxy token, handed back to the caller so it can offer it
        /// to the browser as a cookie for future single-sign-on, mirroring the
        /// `<proxyTokens>` block a successful login response carries.
        freshly_minted_webkdc_proxy_token: Option<Vec<u8>>,
    },
    /// Username/password did not authenticate (`login_failed`).
    LoginFailed { message: String },
    /// No login was attempted and no usable proxy credential was supplied.
    NoUsableProxy,
}

/// Resolves a `requestTokenRequest`'s subject credential into a usable webkdc-proxy
/// of `proxy_type`, running the login pipeline if the subject is a login token.
///
/// Decode/decrypt failures of the supplied credential (bad encryption, expiry,
/// staleness) propagate as a genuine [`WebKdcFault`] — only a *correctly decoded*
/// login attempt that fails authentication, or the simple absence of a usable proxy,
/// resolves to a [`SubjectResolution`] variant instead.
async fn resolve_subject(
    adapter: &mut dyn Krb5Adapter,
    keyring: &KeyringHandle,
    conf: &Conf,
    now: i64,
    subject: &SubjectCredential,
    proxy_type: &str,
) -> Result<SubjectResolution, WebKdcFault> {
    match subject {
        SubjectCredential::Proxy { .. } => match find_proxy_subject(Some(subject), keyring, now, proxy_type) {
            Ok(proxy) => Ok(SubjectResolution::Proxy {
                proxy,
                freshly_minted_webkdc_proxy_token: None,
            }),
            Err(fault) if fault.code == WebKdcErrorCode::ProxyTokenRequired => Ok(SubjectResolution::NoUsableProxy),
            Err(fault) => Err(fault),
        },
        SubjectCredential::Login { login_token } => {
            let keys = keyring.all_keys(now);
            let token_max_ttl = i64::try_from(conf.token_max_ttl.as_secs()).unwrap_or(i64::MAX);
            let attrs = token::parse(login_token, token_max_ttl, now, keys.iter())
                .map_err(|err| WebKdcFault::new(classify_token_error(TokenKind::Login, &err), err.to_string()))?;
            let view = LoginTokenView::from_attrs(&attrs).map_err(|err| WebKdcFault::new(WebKdcErrorCode::LoginTokenInvalid, err.to_string()))?;

            let signing_key = keyring.current_key(now);
            let proxy_token_max_lifetime = conf.proxy_token_max_lifetime.map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX));

            match login::do_login(
                adapter,
                &view.username,
                &view.password,
                conf.keytab_path.as_str(),
                now,
                proxy_token_max_lifetime,
                signing_key.as_ref(),
            )
            .await
            {
                Ok(result) => {
                    let key = signing_key.expect("do_login only succeeds once a signing key was supplied");
                    let proxy_attrs = login::decode_webkdc_proxy_token(&result.webkdc_proxy_token, &key.bytes)
                        .map_err(|err| WebKdcFault::new(WebKdcErrorCode::ServerFailure, err.to_string()))?;
                    let proxy_data = WebkdcProxyTokenView::proxy_data(&proxy_attrs)
                        .map_err(|err| WebKdcFault::new(WebKdcErrorCode::ServerFailure, err.to_string()))?
                        .to_vec();
                    Ok(SubjectResolution::Proxy {
                        proxy: ProxySubject {
                            subject: result.subject,
                            proxy_data,
                            expiration: result.expiration,
                        },
                        freshly_minted_webkdc_proxy_token: Some(result.webkdc_proxy_token),
                    })
                }
                Err(login::LoginError::Failed(message)) => Ok(SubjectResolution::LoginFailed { message }),
                Err(login::LoginError::Server(message)) => Err(WebKdcFault::new(WebKdcErrorCode::ServerFailure, message)),
                Err(login::LoginError::NoSigningKey) => Err(WebKdcFault::new(
                    WebKdcErrorCode::ServerFailure,
                    "no signing key is currently available",
                )),
            }
        }
    }
}

/// Validates and processes a `requestTokenRequest`: the end-user-agent single-token
/// issuance path, including the login pipeline and the `fa`/`lc` options.
pub async fn handle_request_token_request(
    adapter: &mut dyn Krb5Adapter,
    policy: &dyn PolicyHook,
    keyring: &KeyringHandle,
    conf: &Conf,
    now: i64,
    request: &RequestTokenRequest,
) -> Result<RequestTokenResponseXml, WebKdcFault> {
    let requester = decode_requester_credential(adapter, keyring, conf, now, &request.requester_credential).await?;
    let RequesterCredential::Service { subject: requester_subject, session_key } = &requester else {
        return Err(WebKdcFault::new(
            WebKdcErrorCode::InvalidRequest,
            "a requestTokenRequest's requesterCredential must be of type service",
        ));
    };

    let token_max_ttl = i64::try_from(conf.token_max_ttl.as_secs()).unwrap_or(i64::MAX);
    let view = decode_request_token_view(&request.request_token, session_key, token_max_ttl, now)?;
    let RequestTokenView::Intent {
        requested_token_type,
        return_url,
        subject_auth_or_proxy_type,
        app_state,
        ..
    } = &view
    else {
        return Err(WebKdcFault::new(
            WebKdcErrorCode::RequestTokenInvalid,
            "requestToken does not carry an end-user-agent intent",
        ));
    };

    let subject = decode_subject_credential(&request.subject_credential)?;

    let proxy_type_for_resolution = if requested_token_type == "proxy" {
        subject_auth_or_proxy_type.as_str()
    } else {
        "krb5"
    };

    // The original renders a login-canceled error token alongside whatever else a
    // `requestTokenRequest` returns whenever the caller set `lc`, independent of
    // whether login succeeded, was forced, or failed — so it is computed once, up
    // front, under the requester's own session key (the relying party, not the
    // keyring, needs to decrypt it).
    let login_canceled_token = view.has_option("lc").then(|| {
        let attrs = ErrorTokenBuilder::new()
            .error_code(WebKdcErrorCode::LoginCanceled.code().to_string())
            .error_message("user canceled login")
            .build(now);
        BASE64.encode(token::create_with_key(attrs, "error", now, now, &KeyBytes::new(*session_key)))
    });

    let base_response = |proxy_tokens: Option<ProxyTokensResponseXml>| RequestTokenResponseXml {
        return_url: return_url.clone(),
        requester_subject: requester_subject.clone(),
        app_state: app_state.as_deref().map(|bytes| BASE64.encode(bytes)),
        proxy_tokens,
        login_canceled_token: login_canceled_token.clone(),
        ..Default::default()
    };

    let resolution = resolve_subject(adapter, keyring, conf, now, &subject, proxy_type_for_resolution).await?;

    let (proxy, proxy_tokens) = match resolution {
        SubjectResolution::Proxy { proxy, freshly_minted_webkdc_proxy_token } => {
            let proxy_tokens = freshly_minted_webkdc_proxy_token.map(|token| ProxyTokensResponseXml {
                proxy_token: vec![ProxyTokenXml {
                    kind: "krb5".to_owned(),
                    data: BASE64.encode(token),
                }],
            });
            (proxy, proxy_tokens)
        }
        SubjectResolution::LoginFailed { message } => {
            return Ok(RequestTokenResponseXml {
                login_error_code: Some(WebKdcErrorCode::LoginFailed.code()),
                login_error_message: Some(message),
                ..base_response(None)
            });
        }
        SubjectResolution::NoUsableProxy => {
            return Ok(RequestTokenResponseXml {
                login_error_code: Some(WebKdcErrorCode::ProxyTokenRequired.code()),
                login_error_message: Some(format!("issuance requires a subject proxy credential of type `{proxy_type_for_resolution}`")),
                ..base_response(None)
            });
        }
    };
    let did_login = proxy_tokens.is_some();

    if view.has_option("fa") && !did_login {
        return Ok(RequestTokenResponseXml {
            login_error_code: Some(WebKdcErrorCode::LoginForced.code()),
            login_error_message: Some("forced authentication, need to login".to_owned()),
            ..base_response(proxy_tokens)
        });
    }

    let minted = match requested_token_type.as_str() {
        "id" => mint_id_token(adapter, policy, session_key, now, requester_subject, subject_auth_or_proxy_type, &proxy).await,
        "proxy" => mint_proxy_token(policy, keyring, session_key, now, requester_subject, subject_auth_or_proxy_type, &proxy),
        other => Err(WebKdcFault::new(
            WebKdcErrorCode::InvalidRequest,
            format!("unsupported requested-token-type: {other}"),
        )),
    };

    match minted {
        Ok(bytes) => Ok(RequestTokenResponseXml {
            requested_token: Some(BASE64.encode(bytes)),
            ..base_response(proxy_tokens)
        }),
        Err(fault) if fault.code == WebKdcErrorCode::Unauthorized => {
            log_fault(&fault, conf.debug);
            let attrs = ErrorTokenBuilder::new()
                .error_code(fault.code.code().to_string())
                .error_message(fault.message)
                .build(now);
            let error_token = token::create_with_key(attrs, "error", now, now, &KeyBytes::new(*session_key));
            Ok(RequestTokenResponseXml {
                requested_token: Some(BASE64.encode(error_token)),
                ..base_response(proxy_tokens)
            })
        }
        Err(fault) => Err(fault),
    }
}
