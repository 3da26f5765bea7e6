use axum::http::{header::AUTHORIZATION, HeaderMap};

/// Caller credentials forwarded to the store for a single request. Nothing here is validated,
/// the store enforces its own access rules with whatever the caller sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSession {
    authorization: Option<String>,
}

impl StoreSession {
    #[cfg(test)]
    pub fn new(authorization: Option<String>) -> Self {
        Self { authorization }
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        let authorization = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(String::from);
        Self { authorization }
    }

    /// Raw `Authorization` header value, e.g. `Bearer eyJ...`
    pub fn authorization(&self) -> Option<&str> {
        self.authorization.as_deref()
    }
}
