//! Remote patient data over HTTP with local catalog fallback
//!
//! Endpoints, relative to the configured base URL:
//! - `GET /patients/{id}/landmarks` -> `[AnatomicalLandmark]`
//! - `GET /patients/{id}/structures` -> `[Structure]`
//! - `GET /patients/{id}/structures/{code}/mesh?lod={lod}` -> `{"url": "..."}`
//!
//! When the server is unreachable or answers with an error, requests are
//! served from the local [`PatientCatalog`] if one is configured.

use anatomica_core::{AnatomicalLandmark, Lod, PatientCatalog, PatientLandmarkProvider, Structure, StructureProvider};
use anyhow::{bail, Context, Result};
use futures_util::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct MeshResponse {
    url: String,
}

/// HTTP-backed patient data provider
pub struct HttpCatalog {
    client: reqwest::Client,
    base_url: String,
    fallback: Option<Arc<PatientCatalog>>,
}

impl HttpCatalog {
    pub fn new(base_url: &str, timeout: Duration, fallback: Option<Arc<PatientCatalog>>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            fallback,
        })
    }

    pub fn landmarks_url(&self, patient_id: &str) -> String {
        format!("{}/patients/{}/landmarks", self.base_url, patient_id)
    }

    pub fn structures_url(&self, patient_id: &str) -> String {
        format!("{}/patients/{}/structures", self.base_url, patient_id)
    }

    pub fn mesh_endpoint(&self, patient_id: &str, code: &str, lod: Lod) -> String {
        format!(
            "{}/patients/{}/structures/{}/mesh?lod={}",
            self.base_url, patient_id, code, lod
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!(url = %url, "Fetching patient data");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        if !response.status().is_success() {
            bail!("{} returned {}", url, response.status());
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Invalid response body from {}", url))
    }

    fn fallback_catalog(&self, url: &str, error: &anyhow::Error) -> Option<&PatientCatalog> {
        match &self.fallback {
            Some(catalog) => {
                warn!(url = %url, error = %error, "Patient data fetch failed, using local catalog");
                Some(catalog.as_ref())
            }
            None => None,
        }
    }
}

impl PatientLandmarkProvider for HttpCatalog {
    fn landmarks<'a>(&'a self, patient_id: &'a str) -> BoxFuture<'a, Result<Vec<AnatomicalLandmark>>> {
        async move {
            let url = self.landmarks_url(patient_id);
            match self.get_json::<Vec<AnatomicalLandmark>>(&url).await {
                Ok(landmarks) => {
                    info!(patient = %patient_id, count = landmarks.len(), "Fetched patient landmarks");
                    Ok(landmarks)
                }
                Err(e) => match self.fallback_catalog(&url, &e) {
                    Some(catalog) => catalog.landmarks(patient_id).await,
                    None => Err(e),
                },
            }
        }
        .boxed()
    }
}

impl StructureProvider for HttpCatalog {
    fn structures<'a>(&'a self, patient_id: &'a str) -> BoxFuture<'a, Result<Vec<Structure>>> {
        async move {
            let url = self.structures_url(patient_id);
            match self.get_json::<Vec<Structure>>(&url).await {
                Ok(structures) => {
                    info!(patient = %patient_id, count = structures.len(), "Fetched patient structures");
                    Ok(structures)
                }
                Err(e) => match self.fallback_catalog(&url, &e) {
                    Some(catalog) => catalog.structures(patient_id).await,
                    None => Err(e),
                },
            }
        }
        .boxed()
    }

    fn mesh_url<'a>(
        &'a self,
        patient_id: &'a str,
        structure_code: &'a str,
        lod: Lod,
    ) -> BoxFuture<'a, Result<String>> {
        async move {
            let url = self.mesh_endpoint(patient_id, structure_code, lod);
            match self.get_json::<MeshResponse>(&url).await {
                Ok(mesh) => Ok(mesh.url),
                Err(e) => match self.fallback_catalog(&url, &e) {
                    Some(catalog) => catalog.mesh_url(patient_id, structure_code, lod).await,
                    None => Err(e),
                },
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable(fallback: Option<Arc<PatientCatalog>>) -> HttpCatalog {
        // Port 9 (discard) is closed on test hosts; connections are refused
        HttpCatalog::new("http://127.0.0.1:9/", Duration::from_secs(2), fallback).unwrap()
    }

    #[test]
    fn test_endpoint_urls() {
        let http = unreachable(None);
        assert_eq!(http.landmarks_url("p1"), "http://127.0.0.1:9/patients/p1/landmarks");
        assert_eq!(http.structures_url("p1"), "http://127.0.0.1:9/patients/p1/structures");
        assert_eq!(
            http.mesh_endpoint("p1", "HEART", Lod::Medium),
            "http://127.0.0.1:9/patients/p1/structures/HEART/mesh?lod=medium"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_without_fallback_fails() {
        let http = unreachable(None);
        assert!(http.structures("demo").await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_uses_local_catalog() {
        let http = unreachable(Some(Arc::new(PatientCatalog::demo())));
        let landmarks = http.landmarks("demo").await.unwrap();
        assert!(landmarks.iter().any(|l| l.code == "left_shoulder"));

        let url = http.mesh_url("demo", "HEART", Lod::Low).await.unwrap();
        assert!(url.ends_with(".low.glb"));
    }
}
