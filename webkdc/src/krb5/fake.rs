//! An in-memory [`Krb5Adapter`] test double, so C6/C7 logic can be exercised without
//! a live KDC.

use std::collections::HashMap;

use async_trait::async_trait;

use super::{ExportedCredential, Krb5Adapter, Krb5Error, SubjectAuthData};

/// A fake realm: a fixed password book and keytab, shared across adapter instances
/// created for the same test.
#[derive(Clone, Default)]
pub struct FakeRealm {
    passwords: HashMap<String, String>,
    keytab_principals: Vec<String>,
}

impl FakeRealm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_password(mut self, principal: impl Into<String>, password: impl Into<String>) -> Self {
        self.passwords.insert(principal.into(), password.into());
        self
    }

    pub fn with_keytab_principal(mut self, principal: impl Into<String>) -> Self {
        self.keytab_principals.push(principal.into());
        self
    }
}

/// An in-memory stand-in for a live Kerberos session. "Credentials" are just
/// principal-name strings serialized as bytes; no real cryptography occurs.
pub struct FakeKrb5Adapter {
    realm: FakeRealm,
    principal: Option<String>,
    now: i64,
}

impl FakeKrb5Adapter {
    pub fn new(realm: FakeRealm, now: i64) -> Self {
        Self {
            realm,
            principal: None,
            now,
        }
    }
}

#[async_trait]
impl Krb5Adapter for FakeKrb5Adapter {
    async fn init_via_password(
        &mut self,
        user: &str,
        pass: &str,
        _keytab: &str,
        in_tkt_service: Option<&str>,
    ) -> Result<String, Krb5Error> {
        let Some(expected) = self.realm.passwords.get(user) else {
            return Err(Krb5Error::ClientPrincipalUnknown);
        };
        if expected != pass {
            return Err(Krb5Error::PreauthFailed);
        }

        self.principal = Some(user.to_owned());
        Ok(in_tkt_service.unwrap_or("webkdc/localhost@EXAMPLE.ORG").to_owned())
    }

    async fn init_via_keytab(&mut self, _keytab: &str, principal: &str) -> Result<(), Krb5Error> {
        if !self.realm.keytab_principals.iter().any(|p| p == principal) {
            return Err(Krb5Error::ClientPrincipalUnknown);
        }
        self.principal = Some(principal.to_owned());
        Ok(())
    }

    async fn init_via_tgt(&mut self, blob: &[u8]) -> Result<(), Krb5Error> {
        let principal = String::from_utf8(blob.to_vec()).map_err(|_| Krb5Error::Other("invalid fake TGT blob".into()))?;
        self.principal = Some(principal);
        Ok(())
    }

    async fn export_tgt(&mut self) -> Result<ExportedCredential, Krb5Error> {
        let principal = self.principal.clone().ok_or_else(|| Krb5Error::Other("no credential cache".into()))?;
        Ok(ExportedCredential {
            blob: principal.into_bytes(),
            expiration: self.now + 10 * 60 * 60,
        })
    }

    async fn mk_req(&mut self, server_principal: &str) -> Result<SubjectAuthData, Krb5Error> {
        let principal = self.principal.clone().ok_or_else(|| Krb5Error::Other("no credential cache".into()))?;
        Ok(format!("AP-REQ:{principal}:{server_principal}").into_bytes())
    }

    async fn rd_req(&mut self, sad: &[u8], _keytab: &str, server_principal: &str) -> Result<String, Krb5Error> {
        let sad = String::from_utf8(sad.to_vec()).map_err(|_| Krb5Error::Other("invalid fake AP-REQ".into()))?;
        let mut parts = sad.splitn(3, ':');
        let (Some("AP-REQ"), Some(client), Some(server)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(Krb5Error::Other("malformed fake AP-REQ".into()));
        };
        if server != server_principal {
            return Err(Krb5Error::Other("AP-REQ server principal mismatch".into()));
        }
        Ok(client.to_owned())
    }

    async fn export_ticket(&mut self, server_principal: &str) -> Result<ExportedCredential, Krb5Error> {
        let principal = self.principal.clone().ok_or_else(|| Krb5Error::Other("no credential cache".into()))?;
        Ok(ExportedCredential {
            blob: format!("TICKET:{principal}:{server_principal}").into_bytes(),
            expiration: self.now + 60 * 60,
        })
    }

    async fn get_principal(&mut self, local_name_conversion: bool) -> Result<String, Krb5Error> {
        let principal = self.principal.clone().ok_or_else(|| Krb5Error::Other("no credential cache".into()))?;
        if local_name_conversion {
            Ok(principal.split('@').next().unwrap_or(&principal).to_owned())
        } else {
            Ok(principal)
        }
    }
}
