//! Caller device identification for the profile library.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;

const X_DEVICE_ID: &str = "x-device-id";

/// Value of the `X-Device-Id` header, trimmed; `None` when absent or blank.
///
/// Whether a device is required is decided per operation, so extraction
/// never fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceId(pub Option<String>);

impl DeviceId {
    /// Reads the header from `headers`.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self(
            headers
                .get(X_DEVICE_ID)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
        )
    }

    /// Borrowed device id.
    #[must_use]
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for DeviceId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn blank_header_reads_as_absent() {
        let mut headers = HeaderMap::new();
        assert_eq!(DeviceId::from_headers(&headers), DeviceId(None));
        headers.insert(X_DEVICE_ID, HeaderValue::from_static("   "));
        assert_eq!(DeviceId::from_headers(&headers), DeviceId(None));
        headers.insert(X_DEVICE_ID, HeaderValue::from_static(" dev-1 "));
        assert_eq!(DeviceId::from_headers(&headers).as_deref(), Some("dev-1"));
    }
}
