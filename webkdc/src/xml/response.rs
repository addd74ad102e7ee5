//! Outbound XML response shapes. Token payloads are base64-encoded text
//! content; `quick-xml`'s `serde` integration handles the element shaping, keeping
//! this purely mechanical while the actual dispatch logic lives in
//! [`crate::handler`].

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename = "errorResponse")]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponseXml {
    pub error_code: u16,
    pub error_message: String,
}

/// One `<token id="…"?>` in a `getTokensResponse`, base64 payload as text content.
/// The `id` is round-tripped from the matching request `<token id="…">` so a batched
/// caller can line results up positionally and by id.
#[derive(Debug, Clone, Serialize)]
pub struct TokenResponseXml {
    #[serde(rename = "@id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "$text")]
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct TokensResponseXml {
    #[serde(rename = "token", default)]
    pub token: Vec<TokenResponseXml>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename = "getTokensResponse")]
#[serde(rename_all = "camelCase")]
pub struct GetTokensResponseXml {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub tokens: TokensResponseXml,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ProxyTokenXml {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(rename = "$text")]
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ProxyTokensResponseXml {
    #[serde(rename = "proxyToken", default)]
    pub proxy_token: Vec<ProxyTokenXml>,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename = "requestTokenResponse")]
#[serde(rename_all = "camelCase")]
pub struct RequestTokenResponseXml {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_error_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_tokens: Option<ProxyTokensResponseXml>,
    pub return_url: String,
    pub requester_subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_canceled_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_state: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_serializes_with_numeric_code() {
        let xml = quick_xml::se::to_string(&ErrorResponseXml {
            error_code: 9,
            error_message: "request_token_stale".to_owned(),
        })
        .expect("serializable");
        assert!(xml.contains("<errorCode>9</errorCode>"));
        assert!(xml.contains("request_token_stale"));
    }

    #[test]
    fn request_token_response_omits_absent_optional_fields() {
        let response = RequestTokenResponseXml {
            return_url: "https://app.example/".to_owned(),
            requester_subject: "service/app@EXAMPLE.ORG".to_owned(),
            ..Default::default()
        };
        let xml = quick_xml::se::to_string(&response).expect("serializable");
        assert!(!xml.contains("loginErrorCode"));
        assert!(xml.contains("returnUrl"));
    }
}
