//! XML request/response (de)serialization, via `quick-xml`'s `serde` integration.
//! Purely mechanical; the dispatch/compatibility-matrix logic this wraps lives in
//! [`crate::handler`].

pub mod request;
pub mod response;

use serde::{de::DeserializeOwned, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("malformed XML request body")]
    Deserialize(#[from] quick_xml::de::DeError),
    #[error("failed to render XML response body")]
    Serialize(#[from] quick_xml::se::SeError),
    #[error("malformed XML request body: {0}")]
    Malformed(String),
}

pub fn parse_request<T: DeserializeOwned>(body: &str) -> Result<T, XmlError> {
    Ok(quick_xml::de::from_str(body)?)
}

pub fn render_response<T: Serialize>(value: &T) -> Result<String, XmlError> {
    Ok(quick_xml::se::to_string(value)?)
}
