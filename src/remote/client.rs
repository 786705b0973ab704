use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::time::Duration;
use url::Url;

use super::api_types::{photo_object_path, ApiSubmissionRow};
use super::http::{Method, Request, Response};
use super::{SubmissionSink, Upstream};
use crate::config::Config;
use crate::queue::PendingSubmission;

/// Backend REST client
#[derive(Clone)]
pub struct BackendClient {
  http: reqwest::Client,
  base: Url,
  submissions_table: String,
  photos_bucket: String,
  device_id: String,
}

impl BackendClient {
  pub fn new(config: &Config, device_id: impl Into<String>) -> Result<Self> {
    let api_key = Config::get_api_key()?;
    let bearer = Config::get_access_token().unwrap_or_else(|| api_key.clone());

    let mut headers = HeaderMap::new();
    headers.insert(
      "apikey",
      HeaderValue::from_str(&api_key).map_err(|e| eyre!("Invalid API key: {}", e))?,
    );
    headers.insert(
      AUTHORIZATION,
      HeaderValue::from_str(&format!("Bearer {}", bearer))
        .map_err(|e| eyre!("Invalid access token: {}", e))?,
    );

    let http = reqwest::Client::builder()
      .default_headers(headers)
      .timeout(Duration::from_secs(config.backend.request_timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    let base = Url::parse(&config.backend.url)
      .map_err(|e| eyre!("Invalid backend url '{}': {}", config.backend.url, e))?;

    Ok(Self {
      http,
      base,
      submissions_table: config.sync.submissions_table.clone(),
      photos_bucket: config.sync.photos_bucket.clone(),
      device_id: device_id.into(),
    })
  }

  fn url(&self, path: &str) -> Result<Url> {
    self
      .base
      .join(path)
      .map_err(|e| eyre!("Invalid request path '{}': {}", path, e))
  }

  fn builder(&self, request: &Request) -> Result<reqwest::RequestBuilder> {
    let mut builder = self
      .http
      .request(request.method.into(), self.url(&request.path)?);
    if let (Some(content_type), Some(body)) = (&request.content_type, &request.body) {
      builder = builder
        .header(CONTENT_TYPE, content_type.as_str())
        .body(body.clone());
    }
    Ok(builder)
  }

  /// Send a request and fail on any non-2xx status.
  async fn send_checked(&self, request: &Request, headers: &[(&str, &str)]) -> Result<()> {
    let mut builder = self.builder(request)?;
    for (name, value) in headers {
      builder = builder.header(*name, *value);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("{} {} failed: {}", request.method, request.path, e))?;

    let status = response.status();
    if status.is_success() {
      return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(eyre!(
      "{} {} returned {}: {}",
      request.method,
      request.path,
      status.as_u16(),
      body
    ))
  }

  /// Upload one photo, overwriting any earlier upload of the same object.
  async fn upload_photo(&self, request: Request) -> Result<()> {
    self.send_checked(&request, &[("x-upsert", "true")]).await
  }
}

#[async_trait]
impl Upstream for BackendClient {
  async fn send(&self, request: &Request) -> Result<Response> {
    let response = self
      .builder(request)?
      .send()
      .await
      .map_err(|e| eyre!("{} {} failed: {}", request.method, request.path, e))?;

    let status = response.status().as_u16();
    let content_type = response
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body: {}", e))?;

    Ok(Response::new(status, content_type, body.to_vec()))
  }
}

#[async_trait]
impl SubmissionSink for BackendClient {
  /// Upload the photos, then upsert the row. Both are keyed by the
  /// submission id, so replaying a partially pushed submission is safe.
  async fn push_submission(&self, submission: &PendingSubmission) -> Result<()> {
    let mut photo_paths = Vec::with_capacity(submission.photos.len());
    let mut uploads = Vec::with_capacity(submission.photos.len());

    for (position, photo) in submission.photos.iter().enumerate() {
      let object = photo_object_path(&submission.id, position, photo.extension());
      let request = Request::new(
        Method::Post,
        format!("/storage/v1/object/{}/{}", self.photos_bucket, object),
      )
      .with_body(photo.content_type.clone(), photo.data.clone());
      uploads.push(self.upload_photo(request));
      photo_paths.push(object);
    }

    futures::future::try_join_all(uploads).await?;

    let row = ApiSubmissionRow::new(submission, &self.device_id, photo_paths);
    let body = serde_json::to_vec(&row).map_err(|e| eyre!("Failed to encode submission: {}", e))?;
    let request = Request::new(
      Method::Post,
      format!("/rest/v1/{}?on_conflict=id", self.submissions_table),
    )
    .with_body("application/json", body);

    self
      .send_checked(
        &request,
        &[("Prefer", "resolution=merge-duplicates,return=minimal")],
      )
      .await
  }
}
