use serde::Deserialize;

use crate::error::{IngestError, Result};

/// Body of an ingestion request. Both fields are required, they are optional here so a missing
/// one is reported as a validation error instead of a decode failure.
#[derive(Deserialize, Debug, Default)]
pub struct VisitRequest {
    ip: Option<String>,
    domain: Option<String>,
}

/// A request that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidVisit {
    pub ip: String,
    pub domain: String,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl VisitRequest {
    pub fn from_body(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|err| IngestError::Validation(format!("Request body is not valid JSON: {err}")))
    }

    pub fn validate(self) -> Result<ValidVisit> {
        let ip = present(self.ip).ok_or_else(|| {
            IngestError::Validation(String::from("IP address is missing from the request body!"))
        })?;
        let domain = present(self.domain).ok_or_else(|| {
            IngestError::Validation(String::from("Domain is missing from the request body!"))
        })?;
        Ok(ValidVisit { ip, domain })
    }
}
