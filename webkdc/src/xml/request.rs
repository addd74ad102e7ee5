//! Inbound XML request shapes, deserialized via `quick-xml`'s `serde`
//! integration. Token payloads travel as base64 text content; decoding them into
//! [`crate::attr::AttributeList`]s happens one layer up, in [`crate::handler`].

use serde::Deserialize;

/// `<requesterCredential type="service|krb5">…</requesterCredential>`.
#[derive(Debug, Clone, Deserialize)]
pub struct RequesterCredentialXml {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(rename = "$text", default)]
    pub data: String,
}

/// `<subjectCredential type="proxy|login">` wraps one or more inner tokens.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectCredentialXml {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(rename = "proxyToken", default)]
    pub proxy_tokens: Vec<String>,
    #[serde(rename = "loginToken", default)]
    pub login_token: Option<String>,
}

/// One `<token type="…" id="…"?>` request inside `<tokens>` of a `getTokensRequest`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequestXml {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(rename = "@id", default)]
    pub id: Option<String>,
    pub authenticator: Option<AuthenticatorXml>,
    pub proxy_type: Option<String>,
    pub credential_type: Option<String>,
    pub server_principal: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthenticatorXml {
    #[serde(rename = "@type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokensXml {
    #[serde(rename = "token", default)]
    pub token: Vec<TokenRequestXml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "getTokensRequest")]
#[serde(rename_all = "camelCase")]
pub struct GetTokensRequest {
    pub requester_credential: RequesterCredentialXml,
    pub subject_credential: Option<SubjectCredentialXml>,
    pub message_id: Option<String>,
    pub request_token: Option<String>,
    pub tokens: TokensXml,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "requestTokenRequest")]
#[serde(rename_all = "camelCase")]
pub struct RequestTokenRequest {
    pub requester_credential: RequesterCredentialXml,
    pub subject_credential: SubjectCredentialXml,
    pub request_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_get_tokens_request() {
        let xml = r#"
            <getTokensRequest>
                <requesterCredential type="krb5">QVAtUkVR</requesterCredential>
                <tokens>
                    <token type="service"/>
                </tokens>
            </getTokensRequest>
        "#;

        let parsed: GetTokensRequest = quick_xml::de::from_str(xml).expect("valid XML");
        assert_eq!(parsed.requester_credential.kind, "krb5");
        assert_eq!(parsed.tokens.token.len(), 1);
        assert_eq!(parsed.tokens.token[0].kind, "service");
    }

    #[test]
    fn parses_a_request_token_request_with_login_subject() {
        let xml = r#"
            <requestTokenRequest>
                <requesterCredential type="service">c2VydmljZQ==</requesterCredential>
                <subjectCredential type="login">
                    <loginToken>bG9naW4=</loginToken>
                </subjectCredential>
                <requestToken>cmVxdWVzdA==</requestToken>
            </requestTokenRequest>
        "#;

        let parsed: RequestTokenRequest = quick_xml::de::from_str(xml).expect("valid XML");
        assert_eq!(parsed.subject_credential.kind, "login");
        assert_eq!(parsed.subject_credential.login_token.as_deref(), Some("bG9naW4="));
    }
}
