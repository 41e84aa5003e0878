use anyhow::{Context, Result};
use chrono::{DateTime, NaiveTime, Utc};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::collect::catalog::{
    ClassificationImage, CollectionQuery, ImageCollection, ImageryCatalog, ReduceRequest, RegionStats, SceneRef,
};
use crate::collect::ee_graph;
use crate::collect::global_variables::{ENV_EE_PROJECT, ENV_EE_TOKEN, WORLDCOVER_BAND};
use crate::collect::retry::RetryPolicy;
use crate::config::ImageryConfig;
use crate::error::CatalogError;

/// Project owning the public data catalog
const PUBLIC_CATALOG_PROJECT: &str = "earthengine-public";
const PAGE_SIZE: u32 = 1000;
const REQUEST_TIMEOUT_S: u64 = 300;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListImagesResponse {
    #[serde(default)]
    images: Vec<EeImage>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EeImage {
    id: String,
    start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    properties: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ComputeResponse {
    result: Value,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Imagery catalog backed by the Earth Engine REST API
/// Scene lookup uses `listImages`; reductions post an expression graph to
/// `value:compute`
pub struct EarthEngineCollect {
    client: Client,
    base_url: Url,
    project: String,
    token: String,
    /// Band holding class codes in classification datasets
    classification_band: String,
    retry: RetryPolicy,
}

impl EarthEngineCollect {
    pub fn new(base_url: &str, project: impl Into<String>, token: impl Into<String>, retry: RetryPolicy) -> Result<Self> {
        let base_url = Url::parse(base_url).context(format!("Invalid Earth Engine URL: {}", base_url))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_S))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(EarthEngineCollect {
            client,
            base_url,
            project: project.into(),
            token: token.into(),
            classification_band: WORLDCOVER_BAND.to_string(),
            retry,
        })
    }

    /// Credentials from `EARTHENGINE_TOKEN`; the project from the config or
    /// `EARTHENGINE_PROJECT`
    pub fn from_env(config: &ImageryConfig, retry: RetryPolicy) -> Result<Self> {
        let token = std::env::var(ENV_EE_TOKEN)
            .context(format!("{} is not set; an OAuth access token is required", ENV_EE_TOKEN))?;
        let project = match &config.project {
            Some(p) => p.clone(),
            None => std::env::var(ENV_EE_PROJECT)
                .context(format!("No Earth Engine project configured and {} is not set", ENV_EE_PROJECT))?,
        };
        let mut collect = Self::new(&config.api_url, project, token, retry)?;
        collect.classification_band = config.land_cover_band.clone();
        Ok(collect)
    }

    fn endpoint(&self, path: &str) -> Result<Url, CatalogError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{}/{}", base, path)).map_err(|e| CatalogError::Decode(format!("bad endpoint {}: {}", path, e)))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.token)
            .header("x-goog-user-project", &self.project)
    }

    fn list_images(&self, asset: &str, params: &[(&str, String)]) -> Result<Vec<EeImage>, CatalogError> {
        let url = self.endpoint(&format!("projects/{}/assets/{}:listImages", PUBLIC_CATALOG_PROJECT, asset))?;
        let mut images = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query: Vec<(&str, String)> = params.to_vec();
            query.push(("pageSize", PAGE_SIZE.to_string()));
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let page: ListImagesResponse = self.retry.run(
                "listImages",
                || -> Result<ListImagesResponse, CatalogError> {
                    let response = self.authorized(self.client.get(url.clone()).query(&query)).send()?;
                    Ok(check_status(response, None)?.json()?)
                },
                CatalogError::is_transient,
            )?;
            images.extend(page.images);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(images)
    }
}

/// Pass a success response through; anything else becomes a `CatalogError`
fn check_status(response: Response, max_pixels: Option<u64>) -> Result<Response, CatalogError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);
    Err(classify_status(status.as_u16(), message, max_pixels))
}

/// Map a non-success status to the catalog taxonomy
fn classify_status(code: u16, message: String, max_pixels: Option<u64>) -> CatalogError {
    match code {
        429 | 500 | 502 | 503 | 504 => CatalogError::Transient { status: code, message },
        404 => CatalogError::NotFound { what: message },
        400 if message.to_lowercase().contains("too many pixels") => CatalogError::PixelLimitExceeded {
            max_pixels: max_pixels.unwrap_or_default(),
        },
        _ => CatalogError::Rejected { status: code, message },
    }
}

fn parse_stats(result: &Value, names: impl Iterator<Item = String>) -> Result<RegionStats, CatalogError> {
    let object = result
        .as_object()
        .ok_or_else(|| CatalogError::Decode(format!("reduceRegion returned {}", result)))?;
    Ok(names
        .map(|name| {
            let value = object.get(&name).and_then(Value::as_f64);
            (name, value)
        })
        .collect())
}

impl ImageryCatalog for EarthEngineCollect {
    fn fetch_collection(&self, query: &CollectionQuery<'_>) -> Result<ImageCollection, CatalogError> {
        let start = query.start.and_time(NaiveTime::MIN).and_utc();
        let end = query.end.and_time(NaiveTime::MIN).and_utc();
        let params = vec![
            ("startTime", start.to_rfc3339()),
            ("endTime", end.to_rfc3339()),
            ("region", query.aoi.to_geojson_string()),
            (
                "filter",
                format!("{} < {}", query.mission.cloud_property, query.cloud_cover_ceiling),
            ),
        ];
        let images = self.list_images(&query.mission.collection_id, &params)?;

        let scenes: Vec<SceneRef> = images
            .into_iter()
            .filter_map(|image| {
                let acquired = image.start_time?;
                let cloud_cover = image
                    .properties
                    .get(&query.mission.cloud_property)
                    .and_then(Value::as_f64);
                Some(SceneRef {
                    id: image.id,
                    acquired,
                    cloud_cover,
                })
            })
            .collect();
        info!(
            "Earth Engine: {} scene(s) of {} between {} and {}",
            scenes.len(),
            query.mission.collection_id,
            query.start,
            query.end
        );
        Ok(ImageCollection::new(query.mission.collection_id.clone(), scenes))
    }

    fn fetch_classification(&self, dataset: &str, year: i32) -> Result<ClassificationImage, CatalogError> {
        let params = vec![
            ("startTime", format!("{}-01-01T00:00:00Z", year)),
            ("endTime", format!("{}-01-01T00:00:00Z", year + 1)),
        ];
        let image = self
            .list_images(dataset, &params)?
            .into_iter()
            .next()
            .ok_or_else(|| CatalogError::NotFound {
                what: format!("{} for {}", dataset, year),
            })?;
        debug!("Earth Engine: classification {} for {}", image.id, year);
        Ok(ClassificationImage {
            dataset: dataset.to_string(),
            id: image.id,
            year,
            band: self.classification_band.clone(),
        })
    }

    fn reduce_region(&self, request: &ReduceRequest<'_>) -> Result<RegionStats, CatalogError> {
        let url = self.endpoint(&format!("projects/{}/value:compute", self.project))?;
        let body = ee_graph::reduce_region(request);

        let response: ComputeResponse = self.retry.run(
            "value:compute",
            || -> Result<ComputeResponse, CatalogError> {
                let response = self.authorized(self.client.post(url.clone()).json(&body)).send()?;
                let response = check_status(response, Some(request.max_pixels))?;
                response.json().map_err(|e| CatalogError::Decode(e.to_string()))
            },
            CatalogError::is_transient,
        )?;
        parse_stats(&response.result, request.bands.iter().map(|b| b.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_stats_keeps_nulls() {
        let result = json!({"NDVI": 0.61, "EVI": null});
        let stats = parse_stats(&result, ["NDVI", "EVI", "LAI"].iter().map(|s| s.to_string())).unwrap();
        assert_eq!(stats["NDVI"], Some(0.61));
        assert_eq!(stats["EVI"], None);
        assert_eq!(stats["LAI"], None);
    }

    #[test]
    fn test_classify_status() {
        let err = classify_status(429, "Quota exceeded".into(), None);
        assert!(matches!(err, CatalogError::Transient { status: 429, .. }));
        assert!(err.is_transient());
        assert!(classify_status(503, String::new(), None).is_transient());

        let err = classify_status(404, "Asset not found".into(), None);
        assert!(matches!(err, CatalogError::NotFound { ref what } if what == "Asset not found"));
        assert!(!err.is_transient());

        let err = classify_status(400, "Too many pixels in the region".into(), Some(1_000));
        assert!(matches!(err, CatalogError::PixelLimitExceeded { max_pixels: 1_000 }));
        assert!(!err.is_transient());

        let err = classify_status(400, "Invalid band name".into(), Some(1_000));
        assert!(matches!(err, CatalogError::Rejected { status: 400, ref message } if message == "Invalid band name"));
    }

    #[test]
    fn test_parse_stats_rejects_non_object() {
        assert!(parse_stats(&json!(3), std::iter::empty::<String>()).is_err());
    }

    #[test]
    fn test_list_images_response() {
        let body = r#"{
            "images": [{
                "type": "IMAGE",
                "name": "projects/earthengine-public/assets/COPERNICUS/S2_SR/20240105T152639_T18LTQ",
                "id": "COPERNICUS/S2_SR/20240105T152639_T18LTQ",
                "startTime": "2024-01-05T15:26:39.024Z",
                "properties": {"CLOUDY_PIXEL_PERCENTAGE": 4.2}
            }],
            "nextPageToken": "abc"
        }"#;
        let page: ListImagesResponse = serde_json::from_str(body).unwrap();
        assert_eq!(page.images.len(), 1);
        assert_eq!(page.next_page_token.as_deref(), Some("abc"));
        assert_eq!(
            page.images[0].properties["CLOUDY_PIXEL_PERCENTAGE"].as_f64(),
            Some(4.2)
        );
        assert!(page.images[0].start_time.is_some());
    }

    #[test]
    fn test_endpoint_join() {
        let ee = EarthEngineCollect::new("https://earthengine.googleapis.com/v1/", "my-proj", "t", RetryPolicy::none())
            .unwrap();
        let url = ee.endpoint("projects/my-proj/value:compute").unwrap();
        assert_eq!(url.as_str(), "https://earthengine.googleapis.com/v1/projects/my-proj/value:compute");
    }
}
