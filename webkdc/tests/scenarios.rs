//! End-to-end scenario tests exercising the request handler against an in-memory
//! keyring and a [`FakeKrb5Adapter`] instead of a live KDC.

#![allow(clippy::unwrap_used)]

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use camino::Utf8PathBuf;
use webkdc::config::{Conf, ConfigError};
use webkdc::error::WebKdcErrorCode;
use webkdc::handler::{
    handle_get_tokens_request, handle_request_token_request, AllowAllPolicy, PolicyHook,
};
use webkdc::keyring::{KeyBytes, KeyringHandle};
use webkdc::krb5::cache::CredCacheLocation;
use webkdc::krb5::fake::{FakeKrb5Adapter, FakeRealm};
use webkdc::token::kinds::{
    LoginTokenBuilder, RequestTokenBuilder, ServiceTokenBuilder, WebkdcProxyTokenBuilder,
};
use webkdc::token::{self};
use webkdc::xml::request::{
    AuthenticatorXml, GetTokensRequest, RequesterCredentialXml, SubjectCredentialXml,
    TokenRequestXml, TokensXml,
};

const SERVER_PRINCIPAL: &str = "webkdc/kdc.example.org@EXAMPLE.ORG";

fn test_conf(tmp_dir: &camino::Utf8Path) -> Result<Conf, ConfigError> {
    Ok(Conf {
        keyring_path: tmp_dir.join("webkdc.keyring"),
        keytab_path: Utf8PathBuf::from("/etc/webkdc.keytab"),
        principal: SERVER_PRINCIPAL.to_owned(),
        token_max_ttl: std::time::Duration::from_secs(300),
        service_token_lifetime: std::time::Duration::from_secs(8 * 60 * 60),
        proxy_token_max_lifetime: None,
        debug: true,
        cred_cache: CredCacheLocation::Directory(tmp_dir.join("caches")),
        listen_address: "127.0.0.1:0".to_owned(),
        key_lifetime: std::time::Duration::from_secs(30 * 24 * 60 * 60),
        log_file: tmp_dir.join("webkdc.log"),
        log_directive: None,
    })
}

fn policy() -> AllowAllPolicy {
    AllowAllPolicy
}

/// S1 — Keyring bootstrap: the path does not exist yet; loading it creates exactly
/// one key, and a token minted right after reload decrypts successfully.
#[test]
fn s1_keyring_bootstrap_creates_one_key_and_is_immediately_usable() {
    let dir = tempfile::tempdir().unwrap();
    let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("webkdc.keyring")).unwrap();
    assert!(!path.exists());

    let keyring = KeyringHandle::load_or_create(&path, 1_000).unwrap();
    assert!(path.exists());
    assert_eq!(keyring.all_keys(1_000).len(), 1);

    let key = keyring.current_key(1_000).expect("a freshly bootstrapped ring always has a valid key");
    let attrs = LoginTokenBuilder::new().username("alice").password("hunter2").build(1_000);
    let token = token::create_with_key(attrs, "login", 1_000, 1_000, &key.bytes);

    let reloaded = KeyringHandle::load_or_create(&path, 2_000).unwrap();
    assert_eq!(reloaded.all_keys(2_000).len(), 1);
    let parsed = token::parse(&token, 0, 1_000, reloaded.all_keys(2_000).iter()).unwrap();
    assert_eq!(parsed.get_str("u").unwrap(), "alice");
}

/// S2 — Service-token issuance: a `krb5` (AP-REQ) requester obtains a `service`
/// token. The response carries one token with a 16-byte session key and an
/// expiration `ServiceTokenLifetime` past issuance.
#[tokio::test]
async fn s2_service_token_issuance() {
    let dir = tempfile::tempdir().unwrap();
    let conf = test_conf(camino::Utf8Path::from_path(dir.path()).unwrap()).unwrap();
    let keyring = KeyringHandle::load_or_create(&conf.keyring_path, 1_000).unwrap();
    let mut adapter = FakeKrb5Adapter::new(FakeRealm::new(), 1_000);

    let client_principal = "service/app.example.org@EXAMPLE.ORG";
    // The fake `rd_req` expects "AP-REQ:<client>:<server>" bytes; no real
    // cryptography is modeled, so the authenticator is built directly rather than
    // round-tripped through `mk_req`.
    let sad = format!("AP-REQ:{client_principal}:{SERVER_PRINCIPAL}").into_bytes();

    let request = GetTokensRequest {
        requester_credential: RequesterCredentialXml {
            kind: "krb5".to_owned(),
            data: BASE64.encode(sad),
        },
        subject_credential: None,
        message_id: None,
        request_token: None,
        tokens: TokensXml {
            token: vec![TokenRequestXml {
                kind: "service".to_owned(),
                id: None,
                authenticator: None,
                proxy_type: None,
                credential_type: None,
                server_principal: None,
            }],
        },
    };

    let response = handle_get_tokens_request(&mut adapter, &policy(), &keyring, &conf, 1_000, &request)
        .await
        .unwrap();

    assert_eq!(response.tokens.token.len(), 1);
    let bytes = BASE64.decode(&response.tokens.token[0].data).unwrap();
    let attrs = token::parse(&bytes, 0, 1_000, keyring.all_keys(1_000).iter()).unwrap();

    assert_eq!(attrs.get_str("t").unwrap(), "webkdc-service");
    assert_eq!(attrs.get_str("s").unwrap(), client_principal);
    assert_eq!(attrs.get("k").unwrap().len(), 16);
    assert_eq!(attrs.get_time("et").unwrap(), 1_000 + conf.service_token_lifetime.as_secs() as i64);
}

fn build_service_token(keyring: &KeyringHandle, now: i64, subject: &str, session_key: [u8; 16]) -> Vec<u8> {
    let key = keyring.current_key(now).unwrap();
    let attrs = ServiceTokenBuilder::new()
        .subject(subject)
        .session_key(session_key)
        .build(now, now + 8 * 60 * 60);
    token::create_with_key(attrs, "webkdc-service", now, now, &key.bytes)
}

fn command_binding_token(session_key: &[u8; 16], now: i64) -> Vec<u8> {
    let attrs = RequestTokenBuilder::command("getTokensRequest", now, now + 300);
    token::create_with_key(attrs, "req", now, now, &KeyBytes::new(*session_key))
}

/// S3 — Proxy-token refresh: given a valid webkdc-proxy token for `alice@REALM`
/// expiring at `E` and a service token for `srv/relying@REALM`, requesting a
/// `proxy` token of type `krb5` yields a proxy token whose wrapped webkdc-proxy
/// names the requester as the new `proxy_subject`, keeps the original subject, and
/// keeps the original expiration.
#[tokio::test]
async fn s3_proxy_token_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let conf = test_conf(camino::Utf8Path::from_path(dir.path()).unwrap()).unwrap();
    let keyring = KeyringHandle::load_or_create(&conf.keyring_path, 1_000).unwrap();
    let mut adapter = FakeKrb5Adapter::new(FakeRealm::new(), 1_000);

    let now = 1_000;
    let relying_party = "srv/relying@EXAMPLE.ORG";
    let session_key = [7u8; 16];
    let service_token = build_service_token(&keyring, now, relying_party, session_key);

    let expiration = now + 3_600;
    let webkdc_proxy_key = keyring.current_key(now).unwrap();
    let webkdc_proxy_attrs = WebkdcProxyTokenBuilder::new()
        .subject("alice@EXAMPLE.ORG")
        .proxy_subject(SERVER_PRINCIPAL)
        .proxy_type("krb5")
        .proxy_data(b"opaque-tgt-blob".to_vec())
        .build(now, expiration);
    let webkdc_proxy_token = token::create_with_key(webkdc_proxy_attrs, "webkdc-proxy", now, now, &webkdc_proxy_key.bytes);

    let request = GetTokensRequest {
        requester_credential: RequesterCredentialXml {
            kind: "service".to_owned(),
            data: BASE64.encode(service_token),
        },
        subject_credential: Some(SubjectCredentialXml {
            kind: "proxy".to_owned(),
            proxy_tokens: vec![BASE64.encode(webkdc_proxy_token)],
            login_token: None,
        }),
        message_id: None,
        request_token: Some(BASE64.encode(command_binding_token(&session_key, now))),
        tokens: TokensXml {
            token: vec![TokenRequestXml {
                kind: "proxy".to_owned(),
                id: None,
                authenticator: None,
                proxy_type: Some("krb5".to_owned()),
                credential_type: None,
                server_principal: None,
            }],
        },
    };

    let response = handle_get_tokens_request(&mut adapter, &policy(), &keyring, &conf, now, &request)
        .await
        .unwrap();

    let bytes = BASE64.decode(&response.tokens.token[0].data).unwrap();
    let attrs = token::parse_with_key(&bytes, 0, now, &KeyBytes::new(session_key)).unwrap();
    assert_eq!(attrs.get_str("t").unwrap(), "proxy");
    assert_eq!(attrs.get_str("s").unwrap(), "alice@EXAMPLE.ORG");
    assert_eq!(attrs.get_time("et").unwrap(), expiration);

    let wrapped = attrs.get("wt").unwrap();
    let inner = token::parse(wrapped, 0, now, keyring.all_keys(now).iter()).unwrap();
    assert_eq!(inner.get_str("ps").unwrap(), relying_party);
    assert_eq!(inner.get_str("s").unwrap(), "alice@EXAMPLE.ORG");
    assert_eq!(inner.get_time("et").unwrap(), expiration);
}

/// S4 — Stale request token: a `getTokensRequest`'s binding `<requestToken>` was
/// created `2*TokenMaxTTL` in the past. The whole call fails with
/// `request_token_stale`, surfaced as a top-level fault (no partial success).
#[tokio::test]
async fn s4_stale_request_token_binding_fails_the_whole_call() {
    let dir = tempfile::tempdir().unwrap();
    let conf = test_conf(camino::Utf8Path::from_path(dir.path()).unwrap()).unwrap();
    let keyring = KeyringHandle::load_or_create(&conf.keyring_path, 1_000).unwrap();
    let mut adapter = FakeKrb5Adapter::new(FakeRealm::new(), 1_000);

    let now = 100_000;
    let session_key = [3u8; 16];
    let service_token = build_service_token(&keyring, now, "srv/relying@EXAMPLE.ORG", session_key);

    let ttl = conf.token_max_ttl.as_secs() as i64;
    let stale_creation = now - 2 * ttl;
    let command_attrs = RequestTokenBuilder::command("getTokensRequest", stale_creation, stale_creation + 300);
    let stale_binding = token::create_with_key(command_attrs, "req", stale_creation, now, &KeyBytes::new(session_key));

    let request = GetTokensRequest {
        requester_credential: RequesterCredentialXml {
            kind: "service".to_owned(),
            data: BASE64.encode(service_token),
        },
        subject_credential: None,
        message_id: None,
        request_token: Some(BASE64.encode(stale_binding)),
        tokens: TokensXml {
            token: vec![TokenRequestXml {
                kind: "service".to_owned(),
                id: None,
                authenticator: None,
                proxy_type: None,
                credential_type: None,
                server_principal: None,
            }],
        },
    };

    let err = handle_get_tokens_request(&mut adapter, &policy(), &keyring, &conf, now, &request)
        .await
        .unwrap_err();
    assert_eq!(err.code, WebKdcErrorCode::RequestTokenStale);
}

fn intent_request_token(requested_token_type: &str, options: &str, sa_or_pt: &str, session_key: &[u8; 16], now: i64, ttl: i64) -> Vec<u8> {
    let attrs = RequestTokenBuilder::intent(requested_token_type, "https://app.example/", options, sa_or_pt, None, now, now + ttl);
    token::create_with_key(attrs, "req", now, now, &KeyBytes::new(*session_key))
}

/// S5 — Login with a bad password: the response is a (200-equivalent)
/// `requestTokenResponse` carrying `loginErrorCode = login_failed` and no tokens.
#[tokio::test]
async fn s5_login_with_bad_password() {
    let dir = tempfile::tempdir().unwrap();
    let conf = test_conf(camino::Utf8Path::from_path(dir.path()).unwrap()).unwrap();
    let keyring = KeyringHandle::load_or_create(&conf.keyring_path, 1_000).unwrap();
    let realm = FakeRealm::new().with_password("alice@EXAMPLE.ORG", "hunter2");
    let mut adapter = FakeKrb5Adapter::new(realm, 1_000);

    let now = 1_000;
    let session_key = [9u8; 16];
    let service_token = build_service_token(&keyring, now, "srv/relying@EXAMPLE.ORG", session_key);

    let login_key = keyring.current_key(now).unwrap();
    let login_attrs = LoginTokenBuilder::new().username("alice@EXAMPLE.ORG").password("wrong").build(now);
    let login_token = token::create_with_key(login_attrs, "login", now, now, &login_key.bytes);

    let request_token = intent_request_token("id", "", "webkdc", &session_key, now, conf.token_max_ttl.as_secs() as i64);

    let request = webkdc::xml::request::RequestTokenRequest {
        requester_credential: RequesterCredentialXml {
            kind: "service".to_owned(),
            data: BASE64.encode(service_token),
        },
        subject_credential: SubjectCredentialXml {
            kind: "login".to_owned(),
            proxy_tokens: Vec::new(),
            login_token: Some(BASE64.encode(login_token)),
        },
        request_token: BASE64.encode(request_token),
    };

    let response = handle_request_token_request(&mut adapter, &policy(), &keyring, &conf, now, &request)
        .await
        .unwrap();

    assert_eq!(response.login_error_code, Some(WebKdcErrorCode::LoginFailed.code()));
    assert!(response.requested_token.is_none());
}

/// S6 — Force-auth without login: the subject credential is a fresh webkdc-proxy
/// (no login happened this call); `fa` is set on the request token. The response
/// carries `loginErrorCode = login_forced` and no requested token.
#[tokio::test]
async fn s6_force_auth_without_fresh_login() {
    let dir = tempfile::tempdir().unwrap();
    let conf = test_conf(camino::Utf8Path::from_path(dir.path()).unwrap()).unwrap();
    let keyring = KeyringHandle::load_or_create(&conf.keyring_path, 1_000).unwrap();
    let mut adapter = FakeKrb5Adapter::new(FakeRealm::new(), 1_000);

    let now = 1_000;
    let session_key = [5u8; 16];
    let service_token = build_service_token(&keyring, now, "srv/relying@EXAMPLE.ORG", session_key);

    let webkdc_proxy_key = keyring.current_key(now).unwrap();
    let webkdc_proxy_attrs = WebkdcProxyTokenBuilder::new()
        .subject("alice@EXAMPLE.ORG")
        .proxy_subject(SERVER_PRINCIPAL)
        .proxy_type("krb5")
        .proxy_data(b"opaque-tgt-blob".to_vec())
        .build(now, now + 3_600);
    let webkdc_proxy_token = token::create_with_key(webkdc_proxy_attrs, "webkdc-proxy", now, now, &webkdc_proxy_key.bytes);

    let request_token = intent_request_token("id", "fa", "webkdc", &session_key, now, conf.token_max_ttl.as_secs() as i64);

    let request = webkdc::xml::request::RequestTokenRequest {
        requester_credential: RequesterCredentialXml {
            kind: "service".to_owned(),
            data: BASE64.encode(service_token),
        },
        subject_credential: SubjectCredentialXml {
            kind: "proxy".to_owned(),
            proxy_tokens: vec![BASE64.encode(webkdc_proxy_token)],
            login_token: None,
        },
        request_token: BASE64.encode(request_token),
    };

    let response = handle_request_token_request(&mut adapter, &policy(), &keyring, &conf, now, &request)
        .await
        .unwrap();

    assert_eq!(response.login_error_code, Some(WebKdcErrorCode::LoginForced.code()));
    assert!(response.requested_token.is_none());
}

/// No usable subject proxy was supplied at all: the response folds
/// `proxy_token_required` into `loginErrorCode` on an otherwise-normal
/// `requestTokenResponse` (so the weblogin front end can prompt for a login), rather
/// than failing the whole call with a top-level `<errorResponse>`.
#[tokio::test]
async fn missing_subject_proxy_folds_into_login_error_code() {
    let dir = tempfile::tempdir().unwrap();
    let conf = test_conf(camino::Utf8Path::from_path(dir.path()).unwrap()).unwrap();
    let keyring = KeyringHandle::load_or_create(&conf.keyring_path, 1_000).unwrap();
    let mut adapter = FakeKrb5Adapter::new(FakeRealm::new(), 1_000);

    let now = 1_000;
    let session_key = [6u8; 16];
    let service_token = build_service_token(&keyring, now, "srv/relying@EXAMPLE.ORG", session_key);

    let request_token = intent_request_token("id", "", "webkdc", &session_key, now, conf.token_max_ttl.as_secs() as i64);

    let request = webkdc::xml::request::RequestTokenRequest {
        requester_credential: RequesterCredentialXml {
            kind: "service".to_owned(),
            data: BASE64.encode(service_token),
        },
        subject_credential: SubjectCredentialXml {
            kind: "proxy".to_owned(),
            proxy_tokens: Vec::new(),
            login_token: None,
        },
        request_token: BASE64.encode(request_token),
    };

    let response = handle_request_token_request(&mut adapter, &policy(), &keyring, &conf, now, &request)
        .await
        .unwrap();

    assert_eq!(response.login_error_code, Some(WebKdcErrorCode::ProxyTokenRequired.code()));
    assert!(response.requested_token.is_none());
}

/// The `lc` (login-canceled) request option rides alongside a successful response —
/// the caller still gets its requested token, plus a `loginCanceledToken` encrypted
/// under the requester's own session key so it can be decrypted by the relying party.
#[tokio::test]
async fn lc_option_attaches_a_login_canceled_token_to_a_successful_response() {
    let dir = tempfile::tempdir().unwrap();
    let conf = test_conf(camino::Utf8Path::from_path(dir.path()).unwrap()).unwrap();
    let keyring = KeyringHandle::load_or_create(&conf.keyring_path, 1_000).unwrap();
    let mut adapter = FakeKrb5Adapter::new(FakeRealm::new(), 1_000);

    let now = 1_000;
    let session_key = [8u8; 16];
    let service_token = build_service_token(&keyring, now, "srv/relying@EXAMPLE.ORG", session_key);

    let webkdc_proxy_key = keyring.current_key(now).unwrap();
    let webkdc_proxy_attrs = WebkdcProxyTokenBuilder::new()
        .subject("alice@EXAMPLE.ORG")
        .proxy_subject(SERVER_PRINCIPAL)
        .proxy_type("krb5")
        .proxy_data(b"opaque-tgt-blob".to_vec())
        .build(now, now + 3_600);
    let webkdc_proxy_token = token::create_with_key(webkdc_proxy_attrs, "webkdc-proxy", now, now, &webkdc_proxy_key.bytes);

    let request_token = intent_request_token("id", "lc", "webkdc", &session_key, now, conf.token_max_ttl.as_secs() as i64);

    let request = webkdc::xml::request::RequestTokenRequest {
        requester_credential: RequesterCredentialXml {
            kind: "service".to_owned(),
            data: BASE64.encode(service_token),
        },
        subject_credential: SubjectCredentialXml {
            kind: "proxy".to_owned(),
            proxy_tokens: vec![BASE64.encode(webkdc_proxy_token)],
            login_token: None,
        },
        request_token: BASE64.encode(request_token),
    };

    let response = handle_request_token_request(&mut adapter, &policy(), &keyring, &conf, now, &request)
        .await
        .unwrap();

    assert!(response.requested_token.is_some());
    let bytes = BASE64.decode(response.login_canceled_token.unwrap()).unwrap();
    let attrs = token::parse_with_key(&bytes, 0, now, &KeyBytes::new(session_key)).unwrap();
    assert_eq!(attrs.get_str("t").unwrap(), "error");
    assert_eq!(attrs.get_str("ec").unwrap(), WebKdcErrorCode::LoginCanceled.code().to_string());
}

/// `lc` also rides alongside a `login_forced` response — the front end needs both
/// signals together to redrive the login flow correctly.
#[tokio::test]
async fn lc_option_attaches_a_login_canceled_token_to_a_login_forced_response() {
    let dir = tempfile::tempdir().unwrap();
    let conf = test_conf(camino::Utf8Path::from_path(dir.path()).unwrap()).unwrap();
    let keyring = KeyringHandle::load_or_create(&conf.keyring_path, 1_000).unwrap();
    let mut adapter = FakeKrb5Adapter::new(FakeRealm::new(), 1_000);

    let now = 1_000;
    let session_key = [4u8; 16];
    let service_token = build_service_token(&keyring, now, "srv/relying@EXAMPLE.ORG", session_key);

    let webkdc_proxy_key = keyring.current_key(now).unwrap();
    let webkdc_proxy_attrs = WebkdcProxyTokenBuilder::new()
        .subject("alice@EXAMPLE.ORG")
        .proxy_subject(SERVER_PRINCIPAL)
        .proxy_type("krb5")
        .proxy_data(b"opaque-tgt-blob".to_vec())
        .build(now, now + 3_600);
    let webkdc_proxy_token = token::create_with_key(webkdc_proxy_attrs, "webkdc-proxy", now, now, &webkdc_proxy_key.bytes);

    let request_token = intent_request_token("id", "fa lc", "webkdc", &session_key, now, conf.token_max_ttl.as_secs() as i64);

    let request = webkdc::xml::request::RequestTokenRequest {
        requester_credential: RequesterCredentialXml {
            kind: "service".to_owned(),
            data: BASE64.encode(service_token),
        },
        subject_credential: SubjectCredentialXml {
            kind: "proxy".to_owned(),
            proxy_tokens: vec![BASE64.encode(webkdc_proxy_token)],
            login_token: None,
        },
        request_token: BASE64.encode(request_token),
    };

    let response = handle_request_token_request(&mut adapter, &policy(), &keyring, &conf, now, &request)
        .await
        .unwrap();

    assert_eq!(response.login_error_code, Some(WebKdcErrorCode::LoginForced.code()));
    assert!(response.login_canceled_token.is_some());
}

/// The stub authorization hook denies everything; an `id` token request should come
/// back as an error token in the requested-token slot rather than a top-level fault.
#[tokio::test]
async fn unauthorized_policy_folds_into_an_error_token() {
    struct DenyAll;
    impl PolicyHook for DenyAll {
        fn authorize(&self, _requester: &str, _action: webkdc::handler::RequestedToken) -> bool {
            false
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let conf = test_conf(camino::Utf8Path::from_path(dir.path()).unwrap()).unwrap();
    let keyring = KeyringHandle::load_or_create(&conf.keyring_path, 1_000).unwrap();
    let mut adapter = FakeKrb5Adapter::new(FakeRealm::new(), 1_000);

    let now = 1_000;
    let session_key = [1u8; 16];
    let service_token = build_service_token(&keyring, now, "srv/relying@EXAMPLE.ORG", session_key);

    let webkdc_proxy_key = keyring.current_key(now).unwrap();
    let webkdc_proxy_attrs = WebkdcProxyTokenBuilder::new()
        .subject("alice@EXAMPLE.ORG")
        .proxy_subject(SERVER_PRINCIPAL)
        .proxy_type("krb5")
        .proxy_data(b"opaque-tgt-blob".to_vec())
        .build(now, now + 3_600);
    let webkdc_proxy_token = token::create_with_key(webkdc_proxy_attrs, "webkdc-proxy", now, now, &webkdc_proxy_key.bytes);

    let request_token = intent_request_token("id", "", "webkdc", &session_key, now, conf.token_max_ttl.as_secs() as i64);

    let request = webkdc::xml::request::RequestTokenRequest {
        requester_credential: RequesterCredentialXml {
            kind: "service".to_owned(),
            data: BASE64.encode(service_token),
        },
        subject_credential: SubjectCredentialXml {
            kind: "proxy".to_owned(),
            proxy_tokens: vec![BASE64.encode(webkdc_proxy_token)],
            login_token: None,
        },
        request_token: BASE64.encode(request_token),
    };

    let response = handle_request_token_request(&mut adapter, &DenyAll, &keyring, &conf, now, &request)
        .await
        .unwrap();

    assert!(response.login_error_code.is_none());
    let bytes = BASE64.decode(response.requested_token.unwrap()).unwrap();
    let attrs = token::parse_with_key(&bytes, 0, now, &KeyBytes::new(session_key)).unwrap();
    assert_eq!(attrs.get_str("t").unwrap(), "error");
    assert_eq!(attrs.get_str("ec").unwrap(), WebKdcErrorCode::Unauthorized.code().to_string());
}

/// A requester AP-REQ that does not verify against the configured server principal
/// is rejected with `requester_krb5_cred_invalid`, not a generic parse error.
#[tokio::test]
async fn bad_ap_req_server_principal_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let conf = test_conf(camino::Utf8Path::from_path(dir.path()).unwrap()).unwrap();
    let keyring = KeyringHandle::load_or_create(&conf.keyring_path, 1_000).unwrap();
    let mut adapter = FakeKrb5Adapter::new(FakeRealm::new(), 1_000);

    let sad = b"AP-REQ:service/app@EXAMPLE.ORG:not-the-kdc@EXAMPLE.ORG".to_vec();
    let request = GetTokensRequest {
        requester_credential: RequesterCredentialXml {
            kind: "krb5".to_owned(),
            data: BASE64.encode(sad),
        },
        subject_credential: None,
        message_id: None,
        request_token: None,
        tokens: TokensXml {
            token: vec![TokenRequestXml {
                kind: "service".to_owned(),
                id: None,
                authenticator: None,
                proxy_type: None,
                credential_type: None,
                server_principal: None,
            }],
        },
    };

    let err = handle_get_tokens_request(&mut adapter, &policy(), &keyring, &conf, 1_000, &request)
        .await
        .unwrap_err();
    assert_eq!(err.code, WebKdcErrorCode::RequesterKrb5CredInvalid);
}

/// The `getTokensRequest` path for an `id` token (type="id" with an
/// `<authenticator type="webkdc">`) is distinct from `requestTokenRequest`'s single-
/// token path above; this covers it along with the `id`/`message_id` round-trip.
#[tokio::test]
async fn get_tokens_request_mints_a_webkdc_backed_id_token() {
    let dir = tempfile::tempdir().unwrap();
    let conf = test_conf(camino::Utf8Path::from_path(dir.path()).unwrap()).unwrap();
    let keyring = KeyringHandle::load_or_create(&conf.keyring_path, 1_000).unwrap();
    let mut adapter = FakeKrb5Adapter::new(FakeRealm::new(), 1_000);

    let now = 1_000;
    let session_key = [2u8; 16];
    let service_token = build_service_token(&keyring, now, "srv/relying@EXAMPLE.ORG", session_key);

    let webkdc_proxy_key = keyring.current_key(now).unwrap();
    let webkdc_proxy_attrs = WebkdcProxyTokenBuilder::new()
        .subject("alice@EXAMPLE.ORG")
        .proxy_subject(SERVER_PRINCIPAL)
        .proxy_type("krb5")
        .proxy_data(b"opaque-tgt-blob".to_vec())
        .build(now, now + 3_600);
    let webkdc_proxy_token = token::create_with_key(webkdc_proxy_attrs, "webkdc-proxy", now, now, &webkdc_proxy_key.bytes);

    let request = GetTokensRequest {
        requester_credential: RequesterCredentialXml {
            kind: "service".to_owned(),
            data: BASE64.encode(service_token),
        },
        subject_credential: Some(SubjectCredentialXml {
            kind: "proxy".to_owned(),
            proxy_tokens: vec![BASE64.encode(webkdc_proxy_token)],
            login_token: None,
        }),
        message_id: Some("abc-123".to_owned()),
        request_token: Some(BASE64.encode(command_binding_token(&session_key, now))),
        tokens: TokensXml {
            token: vec![TokenRequestXml {
                kind: "id".to_owned(),
                id: Some("slot-0".to_owned()),
                authenticator: Some(AuthenticatorXml { kind: "webkdc".to_owned() }),
                proxy_type: None,
                credential_type: None,
                server_principal: None,
            }],
        },
    };

    let response = handle_get_tokens_request(&mut adapter, &policy(), &keyring, &conf, now, &request)
        .await
        .unwrap();

    assert_eq!(response.message_id.as_deref(), Some("abc-123"));
    assert_eq!(response.tokens.token[0].id.as_deref(), Some("slot-0"));

    let bytes = BASE64.decode(&response.tokens.token[0].data).unwrap();
    let attrs = token::parse_with_key(&bytes, 0, now, &KeyBytes::new(session_key)).unwrap();
    assert_eq!(attrs.get_str("t").unwrap(), "id");
    assert_eq!(attrs.get_str("sa").unwrap(), "webkdc");
    assert_eq!(attrs.get_str("s").unwrap(), "alice@EXAMPLE.ORG");
}
