//! TMDB movie catalog
//!
//! Details come from `/movie/{id}` and are cached per item in Redis, so a
//! candidate list only pays for items nobody has looked at recently.

use crate::{
    cached,
    db::{Cache, CacheKey},
    error::{AppError, AppResult},
    models::{ItemDetails, ItemId},
    services::catalog::CatalogProvider,
};
use reqwest::Client as HttpClient;
use serde::Deserialize;

const ITEM_CACHE_TTL: u64 = 604800; // 1 week

#[derive(Debug, Deserialize)]
struct TmdbMovie {
    id: i64,
    title: String,
    #[serde(default)]
    poster_path: Option<String>,
    #[serde(default)]
    release_date: Option<String>,
}

#[derive(Clone)]
pub struct TmdbCatalog {
    http_client: HttpClient,
    api_key: String,
    api_url: String,
    image_base_url: String,
    cache: Cache,
}

impl TmdbCatalog {
    pub fn new(cache: Cache, api_key: String, api_url: String, image_base_url: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            api_key,
            api_url,
            image_base_url,
            cache,
        }
    }

    async fn item_details(&self, item_id: ItemId) -> AppResult<ItemDetails> {
        cached!(
            self.cache,
            CacheKey::ItemDetails(item_id),
            ITEM_CACHE_TTL,
            self.fetch_movie(item_id)
        )
    }

    async fn fetch_movie(&self, item_id: ItemId) -> AppResult<ItemDetails> {
        let url = format!("{}/movie/{}", self.api_url, item_id);

        let response = self
            .http_client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!("movie {}", item_id)));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApi(format!(
                "TMDB returned status {}: {}",
                status, body
            )));
        }

        let movie: TmdbMovie = response.json().await?;
        Ok(self.convert(movie))
    }

    fn convert(&self, movie: TmdbMovie) -> ItemDetails {
        ItemDetails {
            id: movie.id,
            title: movie.title,
            image_ref: movie
                .poster_path
                .map(|path| format!("{}{}", self.image_base_url, path)),
            year: movie.release_date.as_deref().and_then(release_year),
        }
    }
}

/// "1999-10-15" -> 1999
fn release_year(date: &str) -> Option<i32> {
    date.get(..4)?.parse().ok()
}

#[async_trait::async_trait]
impl CatalogProvider for TmdbCatalog {
    async fn get_item_details(&self, item_ids: &[ItemId]) -> AppResult<Vec<ItemDetails>> {
        let mut tasks = Vec::with_capacity(item_ids.len());

        for &item_id in item_ids {
            let catalog = self.clone();
            tasks.push(tokio::spawn(async move { catalog.item_details(item_id).await }));
        }

        let mut results = Vec::new();
        let mut failures = 0usize;

        for task in tasks {
            match task.await {
                Ok(Ok(details)) => results.push(details),
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Item detail fetch failed");
                    failures += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Item detail task join error");
                    failures += 1;
                }
            }
        }

        if failures > 0 {
            tracing::warn!(
                success_count = results.len(),
                error_count = failures,
                "Partial item detail fetch failure"
            );
        }

        if results.is_empty() && failures > 0 {
            return Err(AppError::ExternalApi(
                "Failed to fetch any item details".to_string(),
            ));
        }

        Ok(results)
    }

    fn name(&self) -> &'static str {
        "tmdb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_year_from_tmdb_date() {
        assert_eq!(release_year("1999-10-15"), Some(1999));
        assert_eq!(release_year(""), None);
        assert_eq!(release_year("19"), None);
    }

    #[test]
    fn test_tmdb_movie_payload_parses_with_missing_fields() {
        let movie: TmdbMovie = serde_json::from_str(
            r#"{"id": 27205, "title": "Inception", "vote_average": 8.4}"#,
        )
        .unwrap();
        assert_eq!(movie.id, 27205);
        assert!(movie.poster_path.is_none());
        assert!(movie.release_date.is_none());
    }
}
