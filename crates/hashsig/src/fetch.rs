//! Fetch primitive for manifests and files.
//!
//! Locations are one of:
//!
//! - `zip://{archive path}#{member}` - member of a local zip archive
//! - `http://...` / `https://...` - HTTP GET
//! - anything else - local filesystem path
//!
//! TLS certificates are not validated. Integrity comes from
//! the signed manifest, not from the transport.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, RANGE, USER_AGENT};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use crate::archive;
use crate::config::HashsigConfig;
use crate::error::{HashsigError, HashsigResult};

const USER_AGENT_VALUE: &str = concat!("hashsig/", env!("CARGO_PKG_VERSION"));

/// Prefix of archive member locations.
pub const ZIP_SCHEME: &str = "zip://";

/// Reads bytes from files, URLs and archive members.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> HashsigResult<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(default_headers)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| HashsigError::Network {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client })
    }

    pub fn from_config(config: &HashsigConfig) -> HashsigResult<Self> {
        Self::new(Duration::from_secs(config.timeout_secs))
    }

    /// Read `location` starting at `offset`.
    ///
    /// Returns `None` when the location cannot be read for any reason, so callers
    /// can fall back to the next source. `expected_len` is only checked for
    /// diagnostics; the content is never truncated.
    pub async fn peek(
        &self,
        location: &str,
        expected_len: Option<u64>,
        offset: u64,
    ) -> Option<Vec<u8>> {
        let result = if let Some(member) = location.strip_prefix(ZIP_SCHEME) {
            self.peek_zip(member, offset).await
        } else if location.contains("://") {
            self.peek_http(location, offset).await
        } else {
            self.peek_file(location, offset).await
        };

        match result {
            Ok(bytes) => {
                if let Some(expected) = expected_len {
                    if bytes.len() as u64 != expected {
                        debug!(
                            location = %location,
                            expected,
                            actual = bytes.len(),
                            "fetched length differs from expected"
                        );
                    }
                }
                Some(bytes)
            }
            Err(e) => {
                debug!(location = %location, error = %e, "peek failed");
                None
            }
        }
    }

    async fn peek_http(&self, url: &str, offset: u64) -> HashsigResult<Vec<u8>> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HashsigError::Network {
                message: format!("GET {} returned {}", url, status),
            });
        }

        let body = response.bytes().await.map_err(|e| HashsigError::Network {
            message: format!("failed to read response body: {}", e),
        })?;
        Ok(body.to_vec())
    }

    async fn peek_file(&self, path: &str, offset: u64) -> HashsigResult<Vec<u8>> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| HashsigError::io(format!("failed to open {}", path), e))?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(|e| HashsigError::io(format!("failed to seek {}", path), e))?;
        }

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .await
            .map_err(|e| HashsigError::io(format!("failed to read {}", path), e))?;
        Ok(buf)
    }

    async fn peek_zip(&self, member_ref: &str, offset: u64) -> HashsigResult<Vec<u8>> {
        let (archive_path, member) =
            member_ref
                .split_once('#')
                .ok_or_else(|| HashsigError::InvalidReference {
                    reference: format!("{}{}", ZIP_SCHEME, member_ref),
                    reason: "missing '#' between archive and member".to_string(),
                })?;
        let archive_path = PathBuf::from(archive_path);
        let member = member.to_string();

        let read = move || archive::read_member(&archive_path, &member);
        let bytes = tokio::task::spawn_blocking(read)
            .await
            .map_err(|e| HashsigError::Archive {
                message: format!("archive read task failed: {}", e),
            })??;

        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(bytes.len());
        Ok(bytes[start..].to_vec())
    }
}
