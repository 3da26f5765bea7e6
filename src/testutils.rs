use std::net::SocketAddr;

use axum::Router;
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// Serves `app` on an ephemeral localhost port for the rest of the test.
pub async fn spawn_mock(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// MMDB city record for 8.8.8.8
pub fn sample_geo_json() -> Value {
    json!({
        "city": {"names": {"en": "Mountain View", "ja": "マウンテンビュー"}},
        "continent": {
            "code": "NA",
            "geoname_id": 6255149,
            "names": {"en": "North America", "de": "Nordamerika"}
        },
        "country": {
            "geoname_id": 6252001,
            "is_in_european_union": false,
            "iso_code": "US",
            "names": {"en": "United States", "fr": "États Unis"}
        },
        "location": {"latitude": 37.386, "longitude": -122.0838},
        "subdivisions": [{"names": {"en": "California"}}]
    })
}
