use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::{form_urlencoded, Url};

use crate::error::{IngestError, Result};

const IP_PLACEHOLDER: &str = "{ip}";
const IP_PLACEHOLDER_ENCODED: &str = "%7Bip%7D";

/// Localized names keyed by language code ("en", "de", "pt-BR", ...)
pub type Names = HashMap<String, String>;

/// City-level record returned by the MMDB lookup service. Only the parts we store are
/// modelled, and none of them are required: a partial record still produces a visit.
#[derive(Deserialize, Serialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct GeoData {
    pub city: Option<Named>,
    pub continent: Option<Continent>,
    pub country: Option<Country>,
    pub location: Option<Location>,
    pub subdivisions: Option<Vec<Named>>,
}

#[derive(Deserialize, Serialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Named {
    pub names: Names,
}

#[derive(Deserialize, Serialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Continent {
    pub code: Option<String>,
    pub geoname_id: Option<u64>,
    pub names: Names,
}

#[derive(Deserialize, Serialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Country {
    pub geoname_id: Option<u64>,
    pub is_in_european_union: Option<bool>,
    pub iso_code: Option<String>,
    pub names: Names,
}

#[derive(Deserialize, Serialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Location {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

fn english(names: &Names) -> Option<String> {
    names.get("en").cloned()
}

impl GeoData {
    pub fn continent_name(&self) -> Option<String> {
        self.continent.as_ref().and_then(|c| english(&c.names))
    }
    pub fn country_name(&self) -> Option<String> {
        self.country.as_ref().and_then(|c| english(&c.names))
    }
    pub fn country_iso(&self) -> Option<String> {
        self.country.as_ref().and_then(|c| c.iso_code.clone())
    }
    pub fn is_eu(&self) -> Option<bool> {
        self.country.as_ref().and_then(|c| c.is_in_european_union)
    }
    pub fn city_name(&self) -> Option<String> {
        self.city.as_ref().and_then(|c| english(&c.names))
    }

    /// True when none of the location sections came back, which is what an error reply from
    /// the lookup service decodes to.
    pub fn is_empty(&self) -> bool {
        self.city.is_none()
            && self.continent.is_none()
            && self.country.is_none()
            && self.subdivisions.is_none()
    }

    /// English subdivision names, one entry per subdivision in lookup order. An entry without
    /// an English name stays in place as `None`.
    pub fn subdivision_names(&self) -> Vec<Option<String>> {
        self.subdivisions
            .iter()
            .flatten()
            .map(|sub| english(&sub.names))
            .collect()
    }
}

/// Builds the lookup url for `ip`. A base containing `{ip}` gets the placeholder replaced,
/// anything else gets the ip appended as the last path segment.
pub fn lookup_url(base: &Url, ip: &str) -> Result<Url> {
    let raw = base.as_str();
    if raw.contains(IP_PLACEHOLDER) || raw.contains(IP_PLACEHOLDER_ENCODED) {
        let encoded: String = form_urlencoded::byte_serialize(ip.as_bytes()).collect();
        let filled = raw
            .replace(IP_PLACEHOLDER, &encoded)
            .replace(IP_PLACEHOLDER_ENCODED, &encoded);
        return Url::parse(&filled).map_err(|err| IngestError::Config(err.to_string()));
    }

    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| IngestError::Config(format!("MMDB url {base} can't take a path")))?
        .pop_if_empty()
        .push(ip);
    Ok(url)
}

/// Client for the external geolocation service. Cheap to clone, the connection pool is shared.
#[derive(Clone, Debug)]
pub struct GeoClient {
    http: reqwest::Client,
    base_url: Option<Url>,
}

impl GeoClient {
    pub fn new(http: reqwest::Client, base_url: Option<Url>) -> Self {
        Self { http, base_url }
    }

    /// Fails with a config error when no MMDB url was configured.
    pub fn require_configured(&self) -> Result<&Url> {
        self.base_url
            .as_ref()
            .ok_or_else(|| IngestError::Config(String::from("MMDB url is missing!")))
    }

    #[instrument(skip(self))]
    pub async fn lookup(&self, ip: &str) -> Result<GeoData> {
        let url = lookup_url(self.require_configured()?, ip)?;
        debug!(%url, "Requesting geolocation");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|err| IngestError::Upstream(err.to_string()))?;

        let geo = response
            .json::<GeoData>()
            .await
            .map_err(|err| IngestError::Upstream(format!("unreadable geolocation data: {err}")))?;
        if geo.is_empty() {
            return Err(IngestError::Upstream(format!("no location data for {ip}")));
        }
        Ok(geo)
    }
}
