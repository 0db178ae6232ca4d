//! A simplified S3 client that supports ranged object downloads.
//! It attempts to hide the complexities of working with the AWS SDK for S3.

use crate::error::{FailureKind, RetrievalFailure};

use aws_credential_types::Credentials;
use aws_sdk_s3::config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use bytes::Bytes;
use hashbrown::HashMap;
use tokio::sync::RwLock;
use tracing::Instrument;
use url::Url;

#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub enum S3Credentials {
    AccessKey {
        access_key: String,
        secret_key: String,
    },
    #[default]
    None,
}

impl S3Credentials {
    /// Create an access key credential.
    pub fn access_key(access_key: &str, secret_key: &str) -> Self {
        S3Credentials::AccessKey {
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        }
    }
}

/// A map containing initialised S3Client objects.
///
/// The [aws_sdk_s3::Client] object is relatively expensive to create, so we reuse them where
/// possible. This type provides a map for storing the clients objects.
///
/// The map's key is a 2-tuple of the S3 URL and credentials.
/// The value is the corresponding client object.
#[derive(Debug, Default)]
pub struct S3ClientMap {
    /// A [hashbrown::HashMap] for storing the S3 clients. A read-write lock synchronises access to
    /// the map, optimised for reads.
    map: RwLock<HashMap<(Url, S3Credentials), S3Client>>,
}

impl S3ClientMap {
    /// Create and return an [crate::s3_client::S3ClientMap].
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create an [crate::s3_client::S3Client] object from the map.
    ///
    /// # Arguments
    ///
    /// * `url`: Object storage API URL
    /// * `credentials`: Object storage account credentials
    pub async fn get(&self, url: &Url, credentials: &S3Credentials) -> S3Client {
        let key = (url.clone(), credentials.clone());
        // Common case: return an existing client from the map.
        {
            let map = self.map.read().await;
            if let Some(client) = map.get(&key) {
                return client.clone();
            }
        }
        // Less common case: create a new client, insert it into the map and return it.
        let mut map = self.map.write().await;
        // Allow for a possible race here since we dropped the read lock.
        if let Some(client) = map.get(&key) {
            client.clone()
        } else {
            tracing::info!("Creating new S3 client for {}", url);
            let client = S3Client::new(url, credentials.clone());
            let (_, client) = map.insert_unique_unchecked(key, client);
            client.clone()
        }
    }
}

/// S3 client object.
#[derive(Clone, Debug)]
pub struct S3Client {
    /// Underlying AWS SDK S3 client object.
    client: Client,
    /// A unique identifier for the client, used in log events
    id: String,
}

impl S3Client {
    /// Creates an S3Client object
    ///
    /// # Arguments
    ///
    /// * `url`: Object storage API URL
    /// * `credentials`: Object storage account credentials
    pub fn new(url: &Url, credentials: S3Credentials) -> Self {
        let region = Region::new("us-east-1");
        let builder = aws_sdk_s3::Config::builder().behavior_version(BehaviorVersion::latest());
        let builder = match credentials {
            S3Credentials::AccessKey {
                access_key,
                secret_key,
            } => {
                let credentials = Credentials::from_keys(access_key, secret_key, None);
                builder.credentials_provider(credentials)
            }
            S3Credentials::None => builder,
        };
        let s3_config = builder
            .region(Some(region))
            .endpoint_url(url.to_string())
            .force_path_style(true)
            .build();
        let client = Client::from_conf(s3_config);
        Self {
            client,
            id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Downloads a byte range of an object from object storage and returns the data as Bytes
    ///
    /// # Arguments
    ///
    /// * `bucket`: Name of the bucket
    /// * `key`: Name of the object in the bucket
    /// * `offset`: Offset of the first byte
    /// * `length`: Number of bytes
    #[tracing::instrument(level = "DEBUG", skip(self), fields(client = %self.id))]
    pub async fn download_range(
        &self,
        bucket: &str,
        key: &str,
        offset: u64,
        length: u64,
    ) -> Result<Bytes, RetrievalFailure> {
        let capacity: usize = length.try_into().map_err(|_| {
            RetrievalFailure::new(FailureKind::Other, format!("length {} too large", length))
        })?;
        let mut response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_range(get_range(offset, length))
            .send()
            .instrument(tracing::Span::current())
            .await?;

        // The data returned by the S3 client does not have any alignment guarantees. Copy it
        // into an 8-byte aligned Vec<u8> so that decoded chunks can be reinterpreted as numbers.
        let mut buf = maligned::align_first::<u8, maligned::A8>(capacity);

        // Iterate over the streaming response, copying data into the aligned Vec<u8>.
        while let Some(bytes) = response
            .body
            .try_next()
            .instrument(tracing::Span::current())
            .await?
        {
            buf.extend_from_slice(&bytes)
        }
        // Return as Bytes.
        Ok(buf.into())
    }
}

/// Return a byte range string based on the offset and length.
///
/// The returned string is compatible with the HTTP Range header. A zero length yields no range.
///
/// # Arguments
///
/// * `offset`: Offset of data in bytes
/// * `length`: Length of data in bytes
pub fn get_range(offset: u64, length: u64) -> Option<String> {
    if length == 0 {
        return None;
    }
    // Range-end is inclusive.
    let end = offset + length - 1;
    Some(format!("bytes={}-{}", offset, end))
}

/// Split an `s3://bucket/key` location into bucket and key.
pub fn parse_location(location: &Url) -> Result<(String, String), RetrievalFailure> {
    let bucket = location.host_str().unwrap_or_default();
    let key = location.path().trim_start_matches('/');
    if bucket.is_empty() || key.is_empty() {
        return Err(RetrievalFailure::new(
            FailureKind::Other,
            format!("invalid S3 location {}, expected s3://bucket/key", location),
        ));
    }
    Ok((bucket.to_string(), key.to_string()))
}
