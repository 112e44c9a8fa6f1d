//! HTTP client for the Onshape REST API.
//!
//! Authenticates with API keys over HTTP basic auth. Only the three calls the
//! pipeline needs are implemented: assembly BOM, shaded view, and part export.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use eva3d_shared::{CadReference, Eva3dError, LineItem, Result, WvmType};

use crate::service::{CadBom, CadBomItem, CadService, PartSource};

/// User-Agent string for CAD service requests.
const USER_AGENT: &str = concat!("eva3d/", env!("CARGO_PKG_VERSION"));

/// REST API version prefix.
const API_PREFIX: [&str; 2] = ["api", "v6"];

/// Edge length of the preview image in pixels.
const PREVIEW_SIZE: &str = "600";

/// Onshape REST client.
#[derive(Clone)]
pub struct OnshapeClient {
    client: Client,
    base_url: Url,
    access_key: String,
    secret_key: String,
}

impl OnshapeClient {
    /// Create a client for `base_url` (e.g. `https://cad.onshape.com`).
    pub fn new(
        base_url: &str,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Eva3dError::config(format!("invalid CAD base URL '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Eva3dError::config(format!(
                "CAD base URL '{base_url}' cannot carry a path"
            )));
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()
            .map_err(|e| Eva3dError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        })
    }

    /// Build `<base>/api/v6/<segments...>` with each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        {
            // cannot_be_a_base was rejected in `new`
            if let Ok(mut path) = url.path_segments_mut() {
                path.pop_if_empty().extend(API_PREFIX).extend(segments);
            }
        }
        url
    }

    fn assembly_endpoint(&self, reference: &CadReference, tail: &str) -> Url {
        self.endpoint(&[
            "assemblies",
            "d",
            &reference.document_id,
            reference.wvm_type.as_path_segment(),
            &reference.wvm_id,
            "e",
            &reference.element_id,
            tail,
        ])
    }

    async fn get(&self, url: Url, accept: &str) -> Result<reqwest::Response> {
        debug!(%url, "CAD request");
        let response = self
            .client
            .get(url.clone())
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .header(reqwest::header::ACCEPT, accept)
            .send()
            .await
            .map_err(|e| Eva3dError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Eva3dError::Network(format!("{url}: HTTP {status}")));
        }
        Ok(response)
    }
}

#[async_trait]
impl CadService for OnshapeClient {
    #[instrument(skip_all, fields(reference = %reference))]
    async fn get_assembly_bom(&self, reference: &CadReference) -> Result<CadBom> {
        let mut url = self.assembly_endpoint(reference, "bom");
        url.query_pairs_mut()
            .append_pair("indented", "false")
            .append_pair("generateIfAbsent", "true");

        let body = self
            .get(url.clone(), "application/json")
            .await?
            .bytes()
            .await
            .map_err(|e| Eva3dError::Network(format!("{url}: body read failed: {e}")))?;
        parse_bom_response(&body)
    }

    #[instrument(skip_all, fields(reference = %reference))]
    async fn get_shaded_view(&self, reference: &CadReference) -> Result<Vec<u8>> {
        let mut url = self.assembly_endpoint(reference, "shadedviews");
        url.query_pairs_mut()
            .append_pair("viewMatrix", "isometric")
            .append_pair("outputHeight", PREVIEW_SIZE)
            .append_pair("outputWidth", PREVIEW_SIZE)
            .append_pair("pixelSize", "0");

        let views: ShadedViews = self
            .get(url.clone(), "application/json")
            .await?
            .json()
            .await
            .map_err(|e| Eva3dError::Network(format!("{url}: invalid shaded view JSON: {e}")))?;

        let encoded = views
            .images
            .first()
            .ok_or_else(|| Eva3dError::Network(format!("{url}: response contains no images")))?;
        STANDARD
            .decode(encoded.trim())
            .map_err(|e| Eva3dError::Network(format!("{url}: image is not base64: {e}")))
    }

    #[instrument(skip_all, fields(part_id = %source.part_id))]
    async fn export_part(&self, source: &PartSource) -> Result<Vec<u8>> {
        let mut url = self.endpoint(&[
            "parts",
            "d",
            &source.document_id,
            source.wvm_type.as_path_segment(),
            &source.wvm_id,
            "e",
            &source.element_id,
            "partid",
            &source.part_id,
            "stl",
        ]);
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("mode", "binary")
                .append_pair("units", "millimeter");
            if !source.configuration.is_empty() {
                query.append_pair("configuration", &source.configuration);
            }
        }

        let body = self
            .get(url.clone(), "application/octet-stream")
            .await?
            .bytes()
            .await
            .map_err(|e| Eva3dError::Network(format!("{url}: body read failed: {e}")))?;
        Ok(body.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ShadedViews {
    #[serde(default)]
    images: Vec<String>,
}

#[derive(Deserialize)]
struct BomResponse {
    #[serde(default)]
    headers: Vec<BomHeader>,
    #[serde(default)]
    rows: Vec<BomRow>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BomHeader {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    property_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BomRow {
    #[serde(default)]
    header_id_to_value: HashMap<String, Value>,
    #[serde(default)]
    item_source: Option<ItemSource>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemSource {
    document_id: String,
    wvm_type: String,
    wvm_id: String,
    element_id: String,
    #[serde(default)]
    part_id: Option<String>,
    #[serde(default)]
    full_configuration: Option<String>,
}

impl BomResponse {
    /// Header id of the column whose property or display name is `wanted`.
    fn column(&self, wanted: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| {
                h.property_name
                    .as_deref()
                    .is_some_and(|p| p.eq_ignore_ascii_case(wanted))
                    || h.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(wanted))
            })
            .map(|h| h.id.as_str())
    }
}

/// Parse an assembly BOM response body into line items with export sources.
pub(crate) fn parse_bom_response(body: &[u8]) -> Result<CadBom> {
    let response: BomResponse = serde_json::from_slice(body)
        .map_err(|e| Eva3dError::Network(format!("invalid BOM JSON: {e}")))?;

    let missing = |col: &str| Eva3dError::Network(format!("BOM response has no '{col}' column"));
    let name_id = response.column("name").ok_or_else(|| missing("name"))?;
    let quantity_id = response.column("quantity").ok_or_else(|| missing("quantity"))?;
    let material_id = response.column("material");

    let mut items = Vec::with_capacity(response.rows.len());
    for (n, row) in response.rows.iter().enumerate() {
        let name = row
            .header_id_to_value
            .get(name_id)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Eva3dError::Network(format!("BOM row {n} has no name")))?;

        let quantity = row
            .header_id_to_value
            .get(quantity_id)
            .and_then(value_as_quantity)
            .filter(|q| *q > 0.0)
            .ok_or_else(|| {
                Eva3dError::Network(format!("BOM row {n} ({name}) has no positive quantity"))
            })?;

        let material = material_id
            .and_then(|id| row.header_id_to_value.get(id))
            .map(value_as_material)
            .unwrap_or_default();

        let source = row.item_source.as_ref().and_then(|s| {
            Some(PartSource {
                document_id: s.document_id.clone(),
                wvm_type: parse_wvm_type(&s.wvm_type)?,
                wvm_id: s.wvm_id.clone(),
                element_id: s.element_id.clone(),
                part_id: s.part_id.clone().filter(|p| !p.is_empty())?,
                configuration: s.full_configuration.clone().unwrap_or_default(),
            })
        });

        items.push(CadBomItem {
            item: LineItem {
                name: name.to_string(),
                quantity,
                material,
            },
            source,
        });
    }

    Ok(CadBom { items })
}

fn value_as_quantity(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Materials arrive as a plain string or as `{"displayName": ...}`.
fn value_as_material(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Object(map) => map
            .get("displayName")
            .or_else(|| map.get("id"))
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
        _ => String::new(),
    }
}

fn parse_wvm_type(raw: &str) -> Option<WvmType> {
    match raw.to_ascii_lowercase().as_str() {
        "w" | "workspace" => Some(WvmType::Workspace),
        "v" | "version" => Some(WvmType::Version),
        "m" | "microversion" => Some(WvmType::Microversion),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BOM_JSON: &str = r#"{
        "headers": [
            {"id": "h-name", "name": "Name", "propertyName": "name"},
            {"id": "h-qty", "name": "Quantity", "propertyName": "quantity"},
            {"id": "h-mat", "name": "Material", "propertyName": "material"}
        ],
        "rows": [
            {
                "headerIdToValue": {"h-name": "Bracket", "h-qty": 2, "h-mat": {"displayName": "PETG"}},
                "itemSource": {"documentId": "d1", "wvmType": "w", "wvmId": "w1", "elementId": "e9", "partId": "JHD", "fullConfiguration": "default"}
            },
            {
                "headerIdToValue": {"h-name": "M3x10", "h-qty": "4", "h-mat": null},
                "itemSource": {"documentId": "d1", "wvmType": "v", "wvmId": "v1", "elementId": "e2"}
            }
        ]
    }"#;

    fn reference() -> CadReference {
        CadReference::parse("https://cad.onshape.com/documents/d1/w/w1/e/e1").unwrap()
    }

    #[test]
    fn parses_bom_rows_with_sources() {
        let bom = parse_bom_response(BOM_JSON.as_bytes()).expect("parse");
        assert_eq!(bom.items.len(), 2);

        let bracket = &bom.items[0];
        assert_eq!(bracket.item.name, "Bracket");
        assert_eq!(bracket.item.quantity, 2.0);
        assert!(bracket.item.is_printable());
        let source = bracket.source.as_ref().unwrap();
        assert_eq!(source.part_id, "JHD");
        assert_eq!(source.element_id, "e9");
        assert_eq!(source.configuration, "default");

        let screw = &bom.items[1];
        assert_eq!(screw.item.quantity, 4.0);
        assert_eq!(screw.item.material, "");
        assert!(screw.source.is_none(), "rows without partId carry no source");

        assert_eq!(bom.printable().count(), 1);
    }

    #[test]
    fn bom_without_name_column_is_rejected() {
        let body = r#"{"headers": [{"id": "q", "propertyName": "quantity"}], "rows": []}"#;
        assert!(parse_bom_response(body.as_bytes()).is_err());
    }

    #[tokio::test]
    async fn fetches_bom_with_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v6/assemblies/d/d1/w/w1/e/e1/bom"))
            .and(query_param("indented", "false"))
            // base64("ak:sk")
            .and(header("authorization", "Basic YWs6c2s="))
            .respond_with(ResponseTemplate::new(200).set_body_string(BOM_JSON))
            .mount(&server)
            .await;

        let client =
            OnshapeClient::new(&server.uri(), "ak", "sk", Duration::from_secs(5)).unwrap();
        let bom = client.get_assembly_bom(&reference()).await.expect("bom");
        assert_eq!(bom.items.len(), 2);
    }

    #[tokio::test]
    async fn decodes_shaded_view_image() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v6/assemblies/d/d1/w/w1/e/e1/shadedviews"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "images": [STANDARD.encode(b"\x89PNG")] })),
            )
            .mount(&server)
            .await;

        let client =
            OnshapeClient::new(&server.uri(), "ak", "sk", Duration::from_secs(5)).unwrap();
        let image = client.get_shaded_view(&reference()).await.expect("image");
        assert_eq!(image, b"\x89PNG");
    }

    #[tokio::test]
    async fn exports_part_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v6/parts/d/d1/w/w1/e/e9/partid/JHD/stl"))
            .and(query_param("mode", "binary"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"solid".to_vec()))
            .mount(&server)
            .await;

        let client =
            OnshapeClient::new(&server.uri(), "ak", "sk", Duration::from_secs(5)).unwrap();
        let source = PartSource {
            document_id: "d1".into(),
            wvm_type: WvmType::Workspace,
            wvm_id: "w1".into(),
            element_id: "e9".into(),
            part_id: "JHD".into(),
            configuration: String::new(),
        };
        assert_eq!(client.export_part(&source).await.unwrap(), b"solid");
    }

    #[tokio::test]
    async fn http_error_status_is_a_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client =
            OnshapeClient::new(&server.uri(), "ak", "sk", Duration::from_secs(5)).unwrap();
        let err = client.get_assembly_bom(&reference()).await.unwrap_err();
        assert!(matches!(err, Eva3dError::Network(ref m) if m.contains("403")));
    }
}
