//! Kerberos adapter: wraps a Kerberos v5 client library behind one in-house trait,
//! the way [`crate::keyring`]'s `KeyBytes` wraps its own crypto primitives.
//!
//! Every operation may block on network I/O to the KDC or on native FFI calls, so
//! [`SystemKrb5Adapter`]'s methods run them inside `tokio::task::block_in_place`.

pub mod cache;
pub mod classify {
    pub use super::error::classify_init_error;
}
pub mod error;
pub mod fake;

use async_trait::async_trait;

pub use error::{Krb5Error, LoginFailureClass};

/// An exported, opaque Kerberos credential blob (a serialized TGT or service
/// ticket), together with its expiration time.
#[derive(Clone)]
pub struct ExportedCredential {
    pub blob: Vec<u8>,
    pub expiration: i64,
}

impl core::fmt::Debug for ExportedCredential {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExportedCredential")
            .field("blob_len", &self.blob.len())
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// A subject authenticator (AP-REQ), opaque bytes embedded in an id token's `sad`.
pub type SubjectAuthData = Vec<u8>;

/// A single Kerberos client-library session: context plus the credential cache it
/// currently owns. One instance is created per request and dropped at the end of
/// the handler future, which releases any native resources the implementation
/// acquired.
///
/// This trait makes call sites depend only on the adapter's contract, never on the
/// underlying FFI crate's types — the production implementation ([`SystemKrb5Adapter`])
/// and the test double ([`fake::FakeKrb5Adapter`]) are interchangeable behind it.
#[async_trait]
pub trait Krb5Adapter: Send + Sync {
    /// Obtains a TGT via AS-REQ (forwardable) using a username/password, then
    /// immediately verifies it against `keytab` by requesting and validating a
    /// self-ticket for `in_tkt_service` (or the default service principal in
    /// `keytab` if unset). Returns the canonical server principal used for that
    /// verification.
    async fn init_via_password(
        &mut self,
        user: &str,
        pass: &str,
        keytab: &str,
        in_tkt_service: Option<&str>,
    ) -> Result<String, Krb5Error>;

    /// Acquires a TGT non-interactively from a keytab entry for `principal`.
    async fn init_via_keytab(&mut self, keytab: &str, principal: &str) -> Result<(), Krb5Error>;

    /// Installs a credential blob (as produced by [`Self::export_tgt`]) into the
    /// context, populating it as if by a fresh AS-REQ.
    async fn init_via_tgt(&mut self, blob: &[u8]) -> Result<(), Krb5Error>;

    /// Serializes the context's current TGT for storage in a webkdc-proxy token.
    async fn export_tgt(&mut self) -> Result<ExportedCredential, Krb5Error>;

    /// Produces a subject authenticator (AP-REQ) for `server_principal`.
    async fn mk_req(&mut self, server_principal: &str) -> Result<SubjectAuthData, Krb5Error>;

    /// Verifies an AP-REQ (`sad`) against `keytab`, returning the authenticated
    /// client principal.
    async fn rd_req(&mut self, sad: &[u8], keytab: &str, server_principal: &str) -> Result<String, Krb5Error>;

    /// Obtains and serializes a service ticket for `server_principal` (a TGS-REQ).
    async fn export_ticket(&mut self, server_principal: &str) -> Result<ExportedCredential, Krb5Error>;

    /// Returns the authenticated principal, optionally applying Kerberos →
    /// local-name mapping (`krb5_aname_to_localname` and friends).
    async fn get_principal(&mut self, local_name_conversion: bool) -> Result<String, Krb5Error>;
}

/// The production [`Krb5Adapter`], backed by the system MIT krb5 library via
/// `libkrb5`.
pub struct SystemKrb5Adapter {
    context: libkrb5::Context,
    cache: Option<libkrb5::Ccache>,
    /// The native cache name (`MEMORY:...`, `FILE:...`, `KEYRING:...`) this
    /// adapter's credential cache is created under, per the request's scoped
    /// [`cache::CredCache`]. Defaults to an anonymous `MEMORY` cache when the caller
    /// has no durable cache to hand it (e.g. verifying a requester's AP-REQ, which
    /// never needs a cache of its own).
    cache_name: String,
}

impl SystemKrb5Adapter {
    pub fn new() -> Result<Self, Krb5Error> {
        Self::with_cache_name("MEMORY")
    }

    /// Builds an adapter whose credential cache is created under `cache_name`
    /// (typically [`cache::CredCache::cache_name`]), so the resulting on-disk or
    /// kernel-keyring cache outlives this one adapter instance and can be unlinked
    /// by the `CredCache`'s `Drop` impl rather than by `libkrb5`.
    pub fn with_cache_name(cache_name: impl Into<String>) -> Result<Self, Krb5Error> {
        let context = libkrb5::Context::new().map_err(|err| Krb5Error::Other(err.to_string()))?;
        Ok(Self {
            context,
            cache: None,
            cache_name: cache_name.into(),
        })
    }
}

#[async_trait]
impl Krb5Adapter for SystemKrb5Adapter {
    async fn init_via_password(
        &mut self,
        user: &str,
        pass: &str,
        keytab: &str,
        in_tkt_service: Option<&str>,
    ) -> Result<String, Krb5Error> {
        tokio::task::block_in_place(|| {
            let client_principal = self
                .context
                .parse_name(user)
                .map_err(|err| Krb5Error::Other(err.to_string()))?;

            let creds = self
                .context
                .get_init_creds_password(&client_principal, pass, in_tkt_service)
                .map_err(classify_get_init_creds_error)?;

            let cache = self
                .context
                .cc_new_unique(self.cache_name.as_str())
                .map_err(|err| Krb5Error::Other(err.to_string()))?;
            cache.initialize(&client_principal).map_err(|err| Krb5Error::Other(err.to_string()))?;
            cache.store_cred(&creds).map_err(|err| Krb5Error::Other(err.to_string()))?;
            self.cache = Some(cache);

            // Verify the freshly obtained TGT by requesting and validating a self-ticket
            // against the configured keytab.
            let keytab_handle = self
                .context
                .resolve_keytab(keytab)
                .map_err(|err| Krb5Error::Other(err.to_string()))?;
            let verify_principal = keytab_handle
                .default_principal()
                .map_err(|err| Krb5Error::Other(err.to_string()))?;

            self.context
                .verify_init_creds(&creds, &verify_principal, &keytab_handle)
                .map_err(classify_verify_error)?;

            Ok(verify_principal.to_string())
        })
    }

    async fn init_via_keytab(&mut self, keytab: &str, principal: &str) -> Result<(), Krb5Error> {
        tokio::task::block_in_place(|| {
            let keytab_handle = self
                .context
                .resolve_keytab(keytab)
                .map_err(|err| Krb5Error::Other(err.to_string()))?;
            let client_principal = self
                .context
                .parse_name(principal)
                .map_err(|err| Krb5Error::Other(err.to_string()))?;

            let creds = self
                .context
                .get_init_creds_keytab(&client_principal, &keytab_handle)
                .map_err(|err| Krb5Error::Other(err.to_string()))?;

            let cache = self
                .context
                .cc_new_unique(self.cache_name.as_str())
                .map_err(|err| Krb5Error::Other(err.to_string()))?;
            cache.initialize(&client_principal).map_err(|err| Krb5Error::Other(err.to_string()))?;
            cache.store_cred(&creds).map_err(|err| Krb5Error::Other(err.to_string()))?;
            self.cache = Some(cache);

            Ok(())
        })
    }

    async fn init_via_tgt(&mut self, blob: &[u8]) -> Result<(), Krb5Error> {
        tokio::task::block_in_place(|| {
            let creds = self
                .context
                .unmarshal_credentials(blob)
                .map_err(|err| Krb5Error::Other(err.to_string()))?;

            let cache = self
                .context
                .cc_new_unique(self.cache_name.as_str())
                .map_err(|err| Krb5Error::Other(err.to_string()))?;
            cache
                .initialize(&creds.client_principal())
                .map_err(|err| Krb5Error::Other(err.to_string()))?;
            cache.store_cred(&creds).map_err(|err| Krb5Error::Other(err.to_string()))?;
            self.cache = Some(cache);

            Ok(())
        })
    }

    async fn export_tgt(&mut self) -> Result<ExportedCredential, Krb5Error> {
        tokio::task::block_in_place(|| {
            let cache = self.cache.as_ref().ok_or_else(|| Krb5Error::Other("no credential cache".into()))?;
            let creds = cache.tgt_creds().map_err(|err| Krb5Error::Other(err.to_string()))?;
            let blob = creds.marshal().map_err(|err| Krb5Error::Other(err.to_string()))?;
            Ok(ExportedCredential {
                blob,
                expiration: creds.end_time(),
            })
        })
    }

    async fn mk_req(&mut self, server_principal: &str) -> Result<SubjectAuthData, Krb5Error> {
        tokio::task::block_in_place(|| {
            let cache = self.cache.as_ref().ok_or_else(|| Krb5Error::Other("no credential cache".into()))?;
            let server = self
                .context
                .parse_name(server_principal)
                .map_err(|err| Krb5Error::Other(err.to_string()))?;
            self.context
                .mk_req(cache, &server)
                .map_err(|err| Krb5Error::Other(err.to_string()))
        })
    }

    async fn rd_req(&mut self, sad: &[u8], keytab: &str, server_principal: &str) -> Result<String, Krb5Error> {
        tokio::task::block_in_place(|| {
            let keytab_handle = self
                .context
                .resolve_keytab(keytab)
                .map_err(|err| Krb5Error::Other(err.to_string()))?;
            let server = self
                .context
                .parse_name(server_principal)
                .map_err(|err| Krb5Error::Other(err.to_string()))?;

            let client_principal = self
                .context
                .rd_req(sad, &server, &keytab_handle)
                .map_err(|err| Krb5Error::Other(err.to_string()))?;

            Ok(client_principal.to_string())
        })
    }

    async fn export_ticket(&mut self, server_principal: &str) -> Result<ExportedCredential, Krb5Error> {
        tokio::task::block_in_place(|| {
            let cache = self.cache.as_ref().ok_or_else(|| Krb5Error::Other("no credential cache".into()))?;
            let server = self
                .context
                .parse_name(server_principal)
                .map_err(|err| Krb5Error::Other(err.to_string()))?;

            let creds = self
                .context
                .get_credentials(cache, &server)
                .map_err(|err| Krb5Error::Other(err.to_string()))?;
            let blob = creds.marshal().map_err(|err| Krb5Error::Other(err.to_string()))?;

            Ok(ExportedCredential {
                blob,
                expiration: creds.end_time(),
            })
        })
    }

    async fn get_principal(&mut self, local_name_conversion: bool) -> Result<String, Krb5Error> {
        tokio::task::block_in_place(|| {
            let cache = self.cache.as_ref().ok_or_else(|| Krb5Error::Other("no credential cache".into()))?;
            let principal = cache.principal().map_err(|err| Krb5Error::Other(err.to_string()))?;

            if local_name_conversion {
                self.context
                    .aname_to_localname(&principal)
                    .map_err(|err| Krb5Error::Other(err.to_string()))
            } else {
                Ok(principal.to_string())
            }
        })
    }
}

fn classify_get_init_creds_error(err: libkrb5::Error) -> Krb5Error {
    let message = err.to_string();
    if message.contains("preauth") {
        Krb5Error::PreauthFailed
    } else if message.contains("not found in Kerberos database") || message.contains("client not found") {
        Krb5Error::ClientPrincipalUnknown
    } else {
        Krb5Error::Other(message)
    }
}

fn classify_verify_error(err: libkrb5::Error) -> Krb5Error {
    let message = err.to_string();
    if message.contains("integrity") {
        Krb5Error::BadIntegrity
    } else {
        Krb5Error::Other(message)
    }
}
