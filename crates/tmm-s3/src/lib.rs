//! S3 adapter (aws-sdk-s3).
//!
//! Implements the `tmm-core` `ObjectStore` port against any S3-compatible endpoint.

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{BehaviorVersion, Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    Client,
};
use tracing::debug;

use tmm_core::{config::Config, errors::Error, ports::ObjectStore, Result};

#[derive(Clone, Debug)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint (MinIO, R2, ...). Switches the client to path-style addressing.
    pub endpoint_url: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl S3Settings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            bucket: cfg.s3_bucket.clone(),
            region: cfg.s3_region.clone(),
            endpoint_url: cfg.s3_endpoint_url.clone(),
            access_key_id: cfg.aws_access_key_id.clone(),
            secret_access_key: cfg.aws_secret_access_key.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    pub fn new(settings: S3Settings) -> Self {
        let credentials = Credentials::new(
            settings.access_key_id,
            settings.secret_access_key,
            None,
            None,
            "tmm-env",
        );
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region))
            .credentials_provider(credentials);
        if let Some(endpoint) = settings.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: settings.bucket,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// One delimited listing of the bucket root: common prefixes and root keys.
    async fn list_top_level(&self) -> Result<TopLevel> {
        let mut top = TopLevel::default();
        let mut token: Option<String> = None;
        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .delimiter("/");
            if let Some(t) = &token {
                req = req.continuation_token(t);
            }
            let resp = req.send().await.map_err(|e| map_err("list", "/", e))?;

            top.folders.extend(
                resp.common_prefixes()
                    .iter()
                    .filter_map(|p| p.prefix())
                    .filter_map(folder_from_prefix),
            );
            top.keys
                .extend(resp.contents().iter().filter_map(|o| o.key().map(str::to_string)));

            match resp.next_continuation_token() {
                Some(next) if resp.is_truncated().unwrap_or(false) => {
                    token = Some(next.to_string())
                }
                _ => break,
            }
        }
        Ok(top)
    }
}

#[derive(Debug, Default)]
struct TopLevel {
    folders: Vec<String>,
    keys: Vec<String>,
}

fn map_err<E>(op: &str, key: &str, e: E) -> Error
where
    E: std::error::Error + 'static,
{
    Error::External(format!("s3 {op} {key}: {}", DisplayErrorContext(e)))
}

/// `a/b/` -> `a/b`; the bare delimiter yields nothing.
fn folder_from_prefix(prefix: &str) -> Option<String> {
    let folder = prefix.trim_end_matches('/');
    if folder.is_empty() {
        None
    } else {
        Some(folder.to_string())
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let size = bytes.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| {
                Error::Upload(format!(
                    "s3://{}/{key}: {}",
                    self.bucket,
                    DisplayErrorContext(e)
                ))
            })?;
        debug!(bucket = %self.bucket, key = %key, bytes = size, "object uploaded");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_err("get", key, e))?;
        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| map_err("read", key, e))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    Ok(false)
                } else {
                    Err(map_err("head", key, e))
                }
            }
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(t) = &token {
                req = req.continuation_token(t);
            }
            let resp = req.send().await.map_err(|e| map_err("list", prefix, e))?;

            keys.extend(resp.contents().iter().filter_map(|o| o.key().map(str::to_string)));

            match resp.next_continuation_token() {
                Some(next) if resp.is_truncated().unwrap_or(false) => {
                    token = Some(next.to_string())
                }
                _ => break,
            }
        }
        Ok(keys)
    }

    async fn list_folders(&self) -> Result<Vec<String>> {
        Ok(self.list_top_level().await?.folders)
    }

    async fn list_root(&self) -> Result<Vec<String>> {
        Ok(self.list_top_level().await?.keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_prefixes_lose_trailing_slash() {
        assert_eq!(folder_from_prefix("trip/").as_deref(), Some("trip"));
        assert_eq!(folder_from_prefix("a/b/").as_deref(), Some("a/b"));
        assert_eq!(folder_from_prefix("/"), None);
        assert_eq!(folder_from_prefix(""), None);
    }

    #[test]
    fn settings_come_from_config() {
        let cfg = Config::from_lookup(|k| match k {
            "TELEGRAM_BOT_TOKEN" => Some("123:abc".to_string()),
            "S3_BUCKET" => Some("media".to_string()),
            "S3_ENDPOINT_URL" => Some("http://localhost:9000".to_string()),
            "AWS_ACCESS_KEY_ID" => Some("key".to_string()),
            "AWS_SECRET_ACCESS_KEY" => Some("secret".to_string()),
            _ => None,
        })
        .unwrap();
        let s = S3Settings::from_config(&cfg);
        assert_eq!(s.bucket, "media");
        assert_eq!(s.region, "us-east-1");
        assert_eq!(s.endpoint_url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(s.access_key_id, "key");
    }
}
