use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use url::Url;

use crate::error::IngestError;

/// Connection string used when `CHUNKFLOW_STORAGE` is unset
pub const DEFAULT_STORAGE: &str = "./chunkflow-data";

const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    /// Custom endpoint (MinIO, localstack); AWS when absent
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
}

impl S3Config {
    pub fn for_minio(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: DEFAULT_REGION.to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            path_style: true,
        }
    }
}

/// Storage backend selected by one connection string
///
/// - `memory://`
/// - `file:///abs/dir`, or a plain filesystem path
/// - `s3://ACCESS:SECRET@host:port/?region=eu-west-1&path_style=true&tls=false`
///
/// For `s3://` without credentials in the URL, `S3_ACCESS_KEY` /
/// `AWS_ACCESS_KEY_ID` and `S3_SECRET_KEY` / `AWS_SECRET_ACCESS_KEY` are used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageConfig {
    Memory,
    FileSystem { root: PathBuf },
    S3(S3Config),
}

impl StorageConfig {
    /// Read `CHUNKFLOW_STORAGE`, falling back to [`DEFAULT_STORAGE`]
    pub fn from_env() -> Result<Self, IngestError> {
        env::var("CHUNKFLOW_STORAGE")
            .unwrap_or_else(|_| DEFAULT_STORAGE.to_string())
            .parse()
    }

    fn parse_s3(url: &Url) -> Result<Self, IngestError> {
        let query = |name: &str| {
            url.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
        };
        let flag = |name: &str, default: bool| -> Result<bool, IngestError> {
            query(name)
                .map(|v| {
                    v.parse::<bool>()
                        .map_err(|_| IngestError::Config(format!("{} must be true or false", name)))
                })
                .transpose()
                .map(|v| v.unwrap_or(default))
        };

        let endpoint = match url.host_str().filter(|h| !h.is_empty()) {
            Some(host) => {
                let scheme = if flag("tls", true)? { "https" } else { "http" };
                Some(match url.port() {
                    Some(port) => format!("{}://{}:{}", scheme, host, port),
                    None => format!("{}://{}", scheme, host),
                })
            },
            None => None,
        };

        let access_key = Some(url.username())
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .or_else(|| env::var("S3_ACCESS_KEY").ok())
            .or_else(|| env::var("AWS_ACCESS_KEY_ID").ok())
            .ok_or_else(|| IngestError::Config("S3 access key missing".to_string()))?;
        let secret_key = url
            .password()
            .map(str::to_string)
            .or_else(|| env::var("S3_SECRET_KEY").ok())
            .or_else(|| env::var("AWS_SECRET_ACCESS_KEY").ok())
            .ok_or_else(|| IngestError::Config("S3 secret key missing".to_string()))?;

        Ok(StorageConfig::S3(S3Config {
            path_style: flag("path_style", endpoint.is_some())?,
            endpoint,
            region: query("region").unwrap_or_else(|| DEFAULT_REGION.to_string()),
            access_key,
            secret_key,
        }))
    }
}

impl FromStr for StorageConfig {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IngestError::Config("empty storage connection string".to_string()));
        }

        match Url::parse(s) {
            Ok(url) => match url.scheme() {
                "memory" => Ok(StorageConfig::Memory),
                "file" => url
                    .to_file_path()
                    .map(|root| StorageConfig::FileSystem { root })
                    .map_err(|_| IngestError::Config(format!("invalid file URL: {}", s))),
                "s3" => Self::parse_s3(&url),
                other => Err(IngestError::Config(format!(
                    "unsupported storage scheme '{}'",
                    other
                ))),
            },
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(StorageConfig::FileSystem {
                root: PathBuf::from(s),
            }),
            Err(e) => Err(IngestError::Config(format!(
                "invalid storage connection string: {}",
                e
            ))),
        }
    }
}
