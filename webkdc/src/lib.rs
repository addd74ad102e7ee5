#[macro_use]
extern crate tracing;

pub mod attr;
pub mod config;
pub mod error;
pub mod handler;
pub mod http;
pub mod keyring;
pub mod krb5;
pub mod log;
pub mod login;
pub mod token;
pub mod xml;

use std::sync::Arc;

use crate::config::ConfHandle;
use crate::handler::{AllowAllPolicy, PolicyHook};
use crate::keyring::KeyringHandle;

/// Everything an HTTP handler needs to process a request: the current configuration,
/// the shared keyring, and the authorization policy. A small, cheaply `Clone`-able
/// struct plugged in as `axum::Router` state, rather than a global `static`.
#[derive(Clone)]
pub struct WebKdcState {
    pub conf_handle: ConfHandle,
    pub keyring: KeyringHandle,
    pub policy: Arc<dyn PolicyHook>,
}

impl WebKdcState {
    pub fn new(conf_handle: ConfHandle, keyring: KeyringHandle) -> Self {
        Self {
            conf_handle,
            keyring,
            policy: Arc::new(AllowAllPolicy),
        }
    }
}

impl core::fmt::Debug for WebKdcState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WebKdcState").finish_non_exhaustive()
    }
}
