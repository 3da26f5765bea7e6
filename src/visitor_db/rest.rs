use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, RequestBuilder, Response};
use tracing::debug;
use url::Url;

use super::{DomainRow, NewVisitor, StoreError, VisitorRow, VisitorStore};
use crate::auth::StoreSession;

/// Visitor store reached through a PostgREST endpoint, e.g. the Supabase REST API
#[derive(Clone, Debug)]
pub struct RestStore {
    http: reqwest::Client,
    base: Url,
    anon_key: String,
}

impl RestStore {
    /// `project_url` is the root of the project (`https://<ref>.supabase.co`), tables are
    /// served below `/rest/v1/`.
    pub fn new(
        http: reqwest::Client,
        project_url: &str,
        anon_key: &str,
    ) -> Result<Self, url::ParseError> {
        let mut base = Url::parse(project_url)?;
        base.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(["rest", "v1"]);
        Ok(Self {
            http,
            base,
            anon_key: anon_key.to_string(),
        })
    }

    fn table_url(&self, table: &str) -> Url {
        let mut url = self.base.clone();
        // base was checked to be a base url in new()
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(table);
        }
        url
    }

    /// Requests go out with the project key and the caller's authorization, falling back to
    /// the anon key like the Supabase client does.
    fn request(&self, method: Method, url: Url, session: &StoreSession) -> RequestBuilder {
        let authorization = match session.authorization() {
            Some(value) => value.to_string(),
            None => format!("Bearer {}", self.anon_key),
        };
        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .header(AUTHORIZATION, authorization)
    }
}

async fn check_status(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Status(status.as_u16(), body))
}

#[async_trait]
impl VisitorStore for RestStore {
    async fn find_domains(
        &self,
        session: &StoreSession,
        domain: &str,
    ) -> Result<Vec<DomainRow>, StoreError> {
        let mut url = self.table_url("domains");
        url.query_pairs_mut()
            .append_pair("select", "id")
            .append_pair("domain", &format!("eq.{domain}"))
            .append_pair("limit", "2");

        let response = self.request(Method::GET, url, session).send().await?;
        let rows: Vec<DomainRow> = check_status(response).await?.json().await?;
        debug!(domain, matches = rows.len(), "Looked up domain");
        Ok(rows)
    }

    async fn insert_visitor(
        &self,
        session: &StoreSession,
        visitor: &NewVisitor,
    ) -> Result<VisitorRow, StoreError> {
        let response = self
            .request(Method::POST, self.table_url("visitors"), session)
            .header("Prefer", "return=representation")
            .json(visitor)
            .send()
            .await?;

        let mut rows: Vec<VisitorRow> = check_status(response).await?.json().await?;
        match rows.len() {
            1 => Ok(rows.remove(0)),
            n => Err(StoreError::RowCount(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::{
        extract::Query,
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use chrono::Utc;
    use serde_json::{json, Value};

    use super::*;
    use crate::geo::GeoData;
    use crate::testutils::{sample_geo_json, spawn_mock};

    fn header(headers: &HeaderMap, name: &str) -> String {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    async fn domains_route(
        headers: HeaderMap,
        Query(params): Query<HashMap<String, String>>,
    ) -> (StatusCode, Json<Value>) {
        assert_eq!(header(&headers, "apikey"), "anon-key");
        assert_eq!(params.get("select").map(String::as_str), Some("id"));
        assert_eq!(params.get("limit").map(String::as_str), Some("2"));
        let rows = match params.get("domain").map(String::as_str) {
            Some("eq.example.com") => json!([{"id": 42}]),
            Some("eq.twice.com") => json!([{"id": 1}, {"id": 2}]),
            Some("eq.locked.com") => {
                return (StatusCode::UNAUTHORIZED, Json(json!({"message": "JWT expired"})))
            }
            _ => json!([]),
        };
        (StatusCode::OK, Json(rows))
    }

    async fn visitors_route(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        assert_eq!(header(&headers, "prefer"), "return=representation");
        let mut row = body;
        row["id"] = json!(1001);
        if row["ip"] == "0.0.0.0" {
            return (StatusCode::CREATED, Json(json!([])));
        }
        (StatusCode::CREATED, Json(json!([row])))
    }

    async fn store() -> RestStore {
        let app = Router::new()
            .route("/project/rest/v1/domains", get(domains_route))
            .route("/project/rest/v1/visitors", post(visitors_route));
        let addr = spawn_mock(app).await;
        RestStore::new(
            reqwest::Client::new(),
            &format!("http://{addr}/project"),
            "anon-key",
        )
        .unwrap()
    }

    #[test]
    fn table_urls() {
        let store = RestStore::new(reqwest::Client::new(), "https://abc.supabase.co", "k").unwrap();
        assert_eq!(
            store.table_url("domains").as_str(),
            "https://abc.supabase.co/rest/v1/domains"
        );

        let slash = RestStore::new(reqwest::Client::new(), "https://abc.supabase.co/", "k").unwrap();
        assert_eq!(
            slash.table_url("visitors").as_str(),
            "https://abc.supabase.co/rest/v1/visitors"
        );

        assert!(RestStore::new(reqwest::Client::new(), "", "k").is_err());
    }

    #[test]
    fn anon_key_stands_in_for_missing_authorization() {
        let store = RestStore::new(reqwest::Client::new(), "https://abc.supabase.co", "anon").unwrap();
        let url = store.table_url("domains");

        let anonymous = store
            .request(Method::GET, url.clone(), &StoreSession::default())
            .build()
            .unwrap();
        assert_eq!(anonymous.headers()[AUTHORIZATION], "Bearer anon");
        assert_eq!(anonymous.headers()["apikey"], "anon");

        let caller = StoreSession::new(Some(String::from("Bearer user-jwt")));
        let forwarded = store.request(Method::GET, url, &caller).build().unwrap();
        assert_eq!(forwarded.headers()[AUTHORIZATION], "Bearer user-jwt");
    }

    #[tokio::test]
    async fn finds_domains() {
        let store = store().await;
        let session = StoreSession::new(Some(String::from("Bearer token")));

        let rows = store.find_domains(&session, "example.com").await.unwrap();
        assert_eq!(rows, vec![DomainRow::new(42)]);

        let rows = store.find_domains(&session, "twice.com").await.unwrap();
        assert_eq!(rows.len(), 2);

        let rows = store.find_domains(&session, "nobody.net").await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let store = store().await;
        let err = store
            .find_domains(&StoreSession::default(), "locked.com")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Status(401, ref body) if body.contains("JWT expired")));
    }

    #[tokio::test]
    async fn inserts_visitor() {
        let store = store().await;
        let geo: GeoData = serde_json::from_value(sample_geo_json()).unwrap();
        let visitor = NewVisitor::new(42, "8.8.8.8", &geo, Utc::now());

        let row = store
            .insert_visitor(&StoreSession::default(), &visitor)
            .await
            .unwrap();
        assert_eq!(row.id, 1001);
        assert_eq!(row.domain_id, 42);
        assert_eq!(row.visited_at, visitor.visited_at);
        assert_eq!(row.city.as_deref(), Some("Mountain View"));
        assert_eq!(row.subdivisions, vec![Some(String::from("California"))]);
    }

    #[tokio::test]
    async fn empty_insert_result_is_an_error() {
        let store = store().await;
        let visitor = NewVisitor::new(42, "0.0.0.0", &GeoData::default(), Utc::now());

        let err = store
            .insert_visitor(&StoreSession::default(), &visitor)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RowCount(0)));
    }
}
