//! Kerberos failure classification.

/// The two buckets a failed `init_via_password` falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginFailureClass {
    /// Bad password, unknown principal, or similar client-caused authentication
    /// failure — surfaced to the caller as `login_failed`.
    LoginFailed,
    /// Anything else (network error, KDC unreachable, local keytab unreadable) —
    /// surfaced as the generic `krb5` error.
    Krb5,
}

#[derive(Debug, thiserror::Error)]
pub enum Krb5Error {
    #[error("kerberos preauthentication failed")]
    PreauthFailed,
    #[error("kerberos integrity check failed")]
    BadIntegrity,
    #[error("kerberos client principal is unknown to the KDC")]
    ClientPrincipalUnknown,
    #[error("kerberos operation failed: {0}")]
    Other(String),
}

/// Maps a failure from `init_via_password` into its [`LoginFailureClass`] bucket.
///
/// Kept as a single table so a krb5 library upgrade — which may renumber or rename
/// its own error codes — only requires touching this one function.
pub fn classify_init_error(err: &Krb5Error) -> LoginFailureClass {
    match err {
        Krb5Error::PreauthFailed | Krb5Error::BadIntegrity | Krb5Error::ClientPrincipalUnknown => {
            LoginFailureClass::LoginFailed
        }
        Krb5Error::Other(_) => LoginFailureClass::Krb5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preauth_and_integrity_and_unknown_principal_classify_as_login_failed() {
        assert_eq!(classify_init_error(&Krb5Error::PreauthFailed), LoginFailureClass::LoginFailed);
        assert_eq!(classify_init_error(&Krb5Error::BadIntegrity), LoginFailureClass::LoginFailed);
        assert_eq!(
            classify_init_error(&Krb5Error::ClientPrincipalUnknown),
            LoginFailureClass::LoginFailed
        );
    }

    #[test]
    fn anything_else_classifies_as_generic_krb5_failure() {
        assert_eq!(
            classify_init_error(&Krb5Error::Other("KDC unreachable".into())),
            LoginFailureClass::Krb5
        );
    }
}
