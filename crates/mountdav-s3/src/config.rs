use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::Credentials;
use serde::Deserialize;

/// Backend declaration for an S3-compatible bucket, as found in the registry file.
#[derive(Debug, Clone, Deserialize)]
pub struct S3BackendConfig {
    pub bucket: String,
    /// Custom endpoint (R2: `https://{account}.r2.cloudflarestorage.com`)
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// Static credentials; the default AWS provider chain is used when absent
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

impl S3BackendConfig {
    /// Identity used to share listing-cache entries between mounts on the same bucket.
    pub fn identity(&self) -> String {
        format!(
            "s3://{}/{}",
            self.endpoint
                .as_deref()
                .map(|e| e.trim_end_matches('/'))
                .unwrap_or("aws"),
            self.bucket
        )
    }

    fn region(&self) -> Region {
        Region::new(self.region.clone().unwrap_or_else(|| "auto".to_string()))
    }

    /// Build an SDK client for this bucket.
    ///
    /// SDK-level retries are disabled: transient failures surface to the
    /// gateway, which only retries multipart part uploads.
    pub async fn build_client(&self) -> aws_sdk_s3::Client {
        let builder = match (&self.access_key_id, &self.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => {
                let credentials =
                    Credentials::new(access_key_id, secret_access_key, None, None, "mountdav");
                aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(credentials)
                    .region(self.region())
            }
            _ => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(self.region())
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };

        let mut builder = builder
            .retry_config(RetryConfig::disabled())
            .force_path_style(self.force_path_style);
        if let Some(endpoint) = &self.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        aws_sdk_s3::Client::from_conf(builder.build())
    }
}
