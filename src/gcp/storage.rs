use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};

use super::auth::GcpAuth;
use crate::error::{OpsError, Result};
use crate::types::{BucketInfo, StoredObject};

const STORAGE_API: &str = "https://storage.googleapis.com/storage/v1";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageProvider: Send + Sync {
    async fn get_bucket(&self, bucket: &str) -> Result<Option<BucketInfo>>;
    async fn create_bucket(
        &self,
        project: &str,
        bucket: &str,
        location: &str,
        delete_after_days: u32,
    ) -> Result<()>;
    /// Adds an age-based delete rule, keeping any rules already present.
    async fn set_retention(&self, bucket: &str, delete_after_days: u32) -> Result<()>;
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<StoredObject>>;
    async fn object_exists(&self, bucket: &str, object: &str) -> Result<bool>;
}

/// Cloud Storage JSON API v1 client.
pub struct GcsStorage {
    client: Client,
    auth: GcpAuth,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct BucketResource {
    name: String,
    lifecycle: Option<Lifecycle>,
}

#[derive(Debug, Deserialize)]
struct Lifecycle {
    #[serde(default)]
    rule: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectResource>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectResource {
    name: String,
    // The API encodes uint64 as a string.
    size: Option<String>,
    updated: Option<String>,
}

fn delete_rule(days: u32) -> Value {
    json!({ "action": { "type": "Delete" }, "condition": { "age": days } })
}

/// Ages of every rule that deletes by age alone.
fn delete_ages(rules: &[Value]) -> Vec<u32> {
    rules
        .iter()
        .filter(|rule| rule["action"]["type"] == "Delete")
        .filter_map(|rule| match rule["condition"].as_object() {
            // Any other condition narrows which objects the rule reaches.
            Some(condition) if condition.len() == 1 => condition.get("age")?.as_u64(),
            _ => None,
        })
        .filter_map(|age| u32::try_from(age).ok())
        .collect()
}

impl GcsStorage {
    pub fn new(auth: GcpAuth) -> Self {
        Self::with_base_url(STORAGE_API, auth)
    }

    pub fn with_base_url(base_url: impl Into<String>, auth: GcpAuth) -> Self {
        Self {
            client: Client::new(),
            auth,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Builds `<base>/<segments...>` with each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| OpsError::Config(format!("invalid storage endpoint: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| OpsError::Config("invalid storage endpoint".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let token = self.auth.access_token().await?;
        let response = request.bearer_auth(&token).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(OpsError::Api { status, body });
        }
        Ok(response)
    }

    async fn get_optional(&self, url: Url) -> Result<Option<Response>> {
        let token = self.auth.access_token().await?;
        let response = self.client.get(url).bearer_auth(&token).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response)),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(OpsError::Api {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    async fn get_bucket_resource(&self, bucket: &str) -> Result<Option<BucketResource>> {
        match self.get_optional(self.url(&["b", bucket])?).await? {
            Some(response) => Ok(Some(response.json().await?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl StorageProvider for GcsStorage {
    async fn get_bucket(&self, bucket: &str) -> Result<Option<BucketInfo>> {
        Ok(self.get_bucket_resource(bucket).await?.map(|resource| {
            let rules = resource.lifecycle.map(|l| l.rule).unwrap_or_default();
            BucketInfo {
                name: resource.name,
                delete_after_days: delete_ages(&rules),
            }
        }))
    }

    async fn create_bucket(
        &self,
        project: &str,
        bucket: &str,
        location: &str,
        delete_after_days: u32,
    ) -> Result<()> {
        let body = json!({
            "name": bucket,
            "location": location,
            "storageClass": "STANDARD",
            "lifecycle": { "rule": [delete_rule(delete_after_days)] },
        });

        let url = self.url(&["b"])?;
        self.send(self.client.post(url).query(&[("project", project)]).json(&body))
            .await?;
        Ok(())
    }

    async fn set_retention(&self, bucket: &str, delete_after_days: u32) -> Result<()> {
        let resource = self.get_bucket_resource(bucket).await?.ok_or_else(|| {
            OpsError::Api {
                status: 404,
                body: format!("bucket {} not found", bucket),
            }
        })?;

        let mut rules = resource.lifecycle.map(|l| l.rule).unwrap_or_default();
        if !delete_ages(&rules).contains(&delete_after_days) {
            rules.push(delete_rule(delete_after_days));
        }

        let body = json!({ "lifecycle": { "rule": rules } });
        self.send(self.client.patch(self.url(&["b", bucket])?).json(&body))
            .await?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<StoredObject>> {
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(self.url(&["b", bucket, "o"])?)
                .query(&[("prefix", prefix)]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let page: ObjectList = self.send(request).await?.json().await?;
            objects.extend(page.items.into_iter().map(|item| StoredObject {
                name: item.name,
                size: item.size.and_then(|s| s.parse().ok()).unwrap_or(0),
                updated: item
                    .updated
                    .and_then(|s| s.parse::<DateTime<Utc>>().ok()),
            }));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(objects)
    }

    async fn object_exists(&self, bucket: &str, object: &str) -> Result<bool> {
        let url = self.url(&["b", bucket, "o", object])?;
        Ok(self.get_optional(url).await?.is_some())
    }
}
