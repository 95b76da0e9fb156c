use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use super::wire::{DeleteRequest, ErrorBody, FilesResponse, StatsDto};
use super::{join_ids, AssetData, GalleryService, ListRequest};
use crate::error::{GalleryError, GalleryResult};
use crate::models::{MediaKind, Page, RecordId, Stats};

/// Client for the gallery's JSON API rooted at `base_url` (e.g. `http://host/api/`).
#[derive(Clone)]
pub struct HttpGalleryService {
    client: Client,
    base_url: Url,
}

impl HttpGalleryService {
    pub fn new(base_url: &str, timeout: Duration) -> GalleryResult<Self> {
        let mut base_url: Url = base_url.parse()?;
        // `Url::join` drops the last segment unless the base ends with a slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| GalleryError::Transport {
                endpoint: base_url.to_string(),
                source,
            })?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> GalleryResult<Url> {
        Ok(self.base_url.join(path)?)
    }

    async fn send(&self, request: reqwest::RequestBuilder, endpoint: &Url) -> GalleryResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|source| GalleryError::Transport {
                endpoint: endpoint.path().to_string(),
                source,
            })?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(classify_failure(response, endpoint).await)
    }

    async fn read_json<T: DeserializeOwned>(&self, response: Response, endpoint: &Url) -> GalleryResult<T> {
        let bytes = response
            .bytes()
            .await
            .map_err(|source| GalleryError::Transport {
                endpoint: endpoint.path().to_string(),
                source,
            })?;
        serde_json::from_slice(&bytes).map_err(|source| GalleryError::Decode {
            endpoint: endpoint.path().to_string(),
            source,
        })
    }
}

/// Turns a non-2xx response into a status error, keeping the server's message.
async fn classify_failure(response: Response, endpoint: &Url) -> GalleryError {
    let status = response.status();
    let bytes = response.bytes().await.unwrap_or_default();
    let message = serde_json::from_slice::<ErrorBody>(&bytes)
        .map(|body| body.error)
        .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).trim().to_string());
    GalleryError::Status {
        endpoint: endpoint.path().to_string(),
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl GalleryService for HttpGalleryService {
    async fn list_records(&self, request: &ListRequest) -> GalleryResult<Page> {
        let endpoint = self.endpoint("")?;
        let query = request.query;
        let mut params: Vec<(&str, String)> = vec![
            ("page", request.page.to_string()),
            ("page_size", request.page_size.to_string()),
            ("order", query.order.as_str().to_string()),
            ("direction", query.direction.as_str().to_string()),
        ];
        if let Some(kind) = query.category.as_filter() {
            params.push(("type", kind.to_string()));
        }
        if let Some(seed) = query.seed {
            params.push(("seed", seed.to_string()));
        }
        trace!(page = request.page, %query, "GET files");

        let response = self
            .send(self.client.get(endpoint.clone()).query(&params), &endpoint)
            .await?;
        let files: FilesResponse = self.read_json(response, &endpoint).await?;
        Ok(files.into())
    }

    async fn delete_records(&self, ids: &[RecordId]) -> GalleryResult<()> {
        let endpoint = self.endpoint("")?;
        let body = DeleteRequest { ids: join_ids(ids) };
        debug!(ids = %body.ids, "DELETE files");
        self.send(self.client.delete(endpoint.clone()).json(&body), &endpoint)
            .await?;
        Ok(())
    }

    async fn toggle_favorite(&self, id: RecordId) -> GalleryResult<()> {
        let endpoint = self.endpoint(&format!("{id}/favorite"))?;
        self.send(self.client.patch(endpoint.clone()), &endpoint)
            .await?;
        Ok(())
    }

    async fn get_favorite(&self, id: RecordId) -> GalleryResult<bool> {
        let endpoint = self.endpoint(&format!("{id}/favorite"))?;
        let response = self.send(self.client.get(endpoint.clone()), &endpoint).await?;
        self.read_json(response, &endpoint).await
    }

    async fn get_stats(&self) -> GalleryResult<Stats> {
        let endpoint = self.endpoint("stats")?;
        let response = self.send(self.client.get(endpoint.clone()), &endpoint).await?;
        let stats: StatsDto = self.read_json(response, &endpoint).await?;
        Ok(stats.into())
    }

    async fn get_full_asset(&self, id: RecordId, kind: MediaKind) -> GalleryResult<AssetData> {
        let endpoint = self.endpoint(&format!("{}/{id}", kind.as_str()))?;
        let response = self.send(self.client.get(endpoint.clone()), &endpoint).await?;
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|source| GalleryError::Transport {
                endpoint: endpoint.path().to_string(),
                source,
            })?;
        Ok(AssetData {
            id,
            mime_type,
            bytes: bytes.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, OrderKey, QueryIdentity, SortDirection};
    use httpmock::prelude::*;
    use serde_json::json;

    fn service_for(server: &MockServer) -> HttpGalleryService {
        HttpGalleryService::new(&server.url("/api"), Duration::from_secs(5)).unwrap()
    }

    fn file_json(id: u64) -> serde_json::Value {
        json!({
            "ID": id,
            "Hash": format!("hash{id}"),
            "CreatedAt": "2024-05-01T10:00:00Z",
            "Filename": format!("IMG_{id}.jpg"),
            "Size": 1000,
            "MimeType": "image",
            "Image": {
                "FullMimeType": "image/jpeg",
                "Width": 4000,
                "Height": 3000,
                "ThumbnailWidth": 400,
                "ThumbnailHeight": 300,
                "ThumbnailBase64": ""
            }
        })
    }

    #[tokio::test]
    async fn test_list_records_sends_query() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/")
                .query_param("page", "2")
                .query_param("page_size", "15")
                .query_param("order", "random")
                .query_param("direction", "desc")
                .query_param("type", "image")
                .query_param("seed", "1700000000");
            then.status(200).json_body(json!({
                "files": [file_json(16), file_json(17)],
                "pagination": {
                    "total_records": 17,
                    "current_page": 2,
                    "total_pages": 2,
                    "next_page": null,
                    "prev_page": 1
                }
            }));
        });

        let request = ListRequest {
            page: 2,
            page_size: 15,
            query: QueryIdentity {
                order: OrderKey::Random,
                direction: SortDirection::Desc,
                category: Category::Image,
                seed: Some(1_700_000_000),
            },
        };
        let page = service_for(&server).list_records(&request).await.unwrap();

        mock.assert();
        assert_eq!(page.page_number, 2);
        assert!(page.is_last());
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[1].id, 17);
    }

    #[tokio::test]
    async fn test_list_records_omits_filter_for_all() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/")
                .query_param("page", "1")
                .query_param_missing("type")
                .query_param_missing("seed");
            then.status(200).json_body(json!({
                "files": [],
                "pagination": {
                    "total_records": 0,
                    "current_page": 1,
                    "total_pages": 0,
                    "next_page": null,
                    "prev_page": null
                }
            }));
        });

        let request = ListRequest {
            page: 1,
            page_size: 15,
            query: QueryIdentity::default(),
        };
        let page = service_for(&server).list_records(&request).await.unwrap();
        mock.assert();
        assert!(page.records.is_empty());
    }

    #[tokio::test]
    async fn test_delete_sends_joined_ids() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(DELETE)
                .path("/api/")
                .json_body(json!({ "ids": "5,9" }));
            then.status(204);
        });

        service_for(&server).delete_records(&[5, 9]).await.unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn test_server_error_message_is_kept() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/api/stats");
            then.status(500)
                .json_body(json!({ "error": "Failed to fetch count" }));
        });

        let err = service_for(&server).get_stats().await.unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(
            err,
            GalleryError::Status { status: 500, ref message, .. } if message == "Failed to fetch count"
        ));
    }

    #[tokio::test]
    async fn test_stats_and_favorite() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/api/stats");
            then.status(200).json_body(json!({
                "count": 10,
                "video_count": 3,
                "image_count": 7,
                "favorite_count": 2
            }));
        });
        let favorite = server.mock(|when, then| {
            when.method(GET).path("/api/7/favorite");
            then.status(200).json_body(json!(true));
        });
        let toggle = server.mock(|when, then| {
            when.method(PATCH).path("/api/7/favorite");
            then.status(204);
        });

        let service = service_for(&server);
        let stats = service.get_stats().await.unwrap();
        assert_eq!(stats.video_count, 3);
        assert_eq!(stats.favorite_count, 2);
        assert!(service.get_favorite(7).await.unwrap());
        service.toggle_favorite(7).await.unwrap();
        favorite.assert();
        toggle.assert();
    }

    #[tokio::test]
    async fn test_full_asset_uses_kind_path() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/api/video/3");
            then.status(200)
                .header("content-type", "video/mp4")
                .body(vec![1u8, 2, 3]);
        });

        let asset = service_for(&server)
            .get_full_asset(3, MediaKind::Video)
            .await
            .unwrap();
        mock.assert();
        assert_eq!(asset.mime_type, "video/mp4");
        assert_eq!(asset.bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_undecodable_body() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/api/stats");
            then.status(200).body("not json");
        });
        let err = service_for(&server).get_stats().await.unwrap_err();
        assert!(matches!(err, GalleryError::Decode { .. }));
        assert!(!err.is_transient());
    }
}
