use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where the catalog lives, parsed from a store connection string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageConfig {
    /// `memory://`: the in-process document store
    Memory,
    /// `objmem://`: an in-memory object store
    ObjectMemory,
    /// `file://<path>` or a bare path
    Local {
        path: PathBuf,
    },
    /// `s3://<bucket>`
    S3 {
        bucket: String,
        region: Option<String>,
        endpoint: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        allow_http: bool,
    },
}

impl StorageConfig {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::Local { path: path.into() }
    }

    pub fn s3(
        bucket: impl Into<String>,
        region: Option<String>,
        endpoint: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        allow_http: bool,
    ) -> Self {
        Self::S3 {
            bucket: bucket.into(),
            region,
            endpoint,
            access_key_id,
            secret_access_key,
            allow_http,
        }
    }

    /// Parse a store connection string.
    ///
    /// S3 credentials, region and endpoint come from the usual `AWS_*`
    /// environment variables rather than the URL.
    pub fn parse(url: &str) -> anyhow::Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            anyhow::bail!("store connection string must not be empty");
        }

        let Some((scheme, rest)) = url.split_once("://") else {
            return Ok(Self::local(url));
        };

        match scheme {
            "memory" => Ok(Self::Memory),
            "objmem" => Ok(Self::ObjectMemory),
            "file" => {
                if rest.is_empty() {
                    anyhow::bail!("file:// store needs a path");
                }
                Ok(Self::local(rest))
            }
            "s3" => {
                let bucket = rest.trim_end_matches('/');
                if bucket.is_empty() || bucket.contains('/') {
                    anyhow::bail!("s3:// store needs a bare bucket name, got {rest:?}");
                }
                let allow_http = std::env::var("AWS_ALLOW_HTTP")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse::<bool>()
                    .unwrap_or(false);

                Ok(Self::s3(
                    bucket,
                    std::env::var("AWS_REGION").ok(),
                    std::env::var("AWS_ENDPOINT").ok(),
                    std::env::var("AWS_ACCESS_KEY_ID").ok(),
                    std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
                    allow_http,
                ))
            }
            _ => anyhow::bail!(
                "Unknown store scheme: {scheme}. Must be one of memory, objmem, file, s3"
            ),
        }
    }
}
