use core::{fmt, mem};
use std::io::{ErrorKind, Read};

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client,
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
};
use backup_core::{BackupName, Series};
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;
use tracing::{debug, trace, warn};

use super::{BackupStore, CHUNK_SIZE, StoreError};

/// Dumps up to this size are uploaded in one request, larger dumps in parts of this size.
const PART_SIZE: usize = 4 * CHUNK_SIZE;

/// The most parts a multipart upload may have.
const MAX_PARTS: i32 = 10_000;

/// The remote store's config.
#[derive(Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    /// The access key id.
    #[serde(alias = "AWS_ACCESS_KEY_ID")]
    pub access_key_id: String,

    /// The secret access key.
    #[serde(alias = "AWS_SECRET_ACCESS_KEY")]
    pub secret_access_key: String,

    /// The bucket holding the backups.
    #[serde(alias = "AWS_STORAGE_BUCKET_NAME")]
    pub bucket: String,

    /// The bucket's region.
    #[serde(default = "default_region")]
    pub region: String,

    /// Endpoint of an S3 compatible store.
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Address buckets by path instead of by subdomain.
    #[serde(default)]
    pub force_path_style: bool,

    /// Backups are stored under this key prefix.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_region() -> String {
    "us-east-1".into()
}

fn default_key_prefix() -> String {
    "dumps/".into()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            access_key_id: String::new(),
            secret_access_key: String::new(),
            bucket: String::new(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            key_prefix: default_key_prefix(),
        }
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .field("force_path_style", &self.force_path_style)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

/// Backups stored as objects in an S3 bucket.
///
/// The SDK is asynchronous; each call is driven to completion on a private
/// single threaded runtime so the store can be used like the local one.
pub struct S3Store {
    runtime: Runtime,
    client: Client,
    bucket: String,
    key_prefix: String,
}

impl S3Store {
    /// Create a client for the configured bucket.
    pub fn connect(config: &RemoteConfig) -> Result<Self, StoreError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(StoreError::Runtime)?;

        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "db-backup-config",
        );

        let mut loader = aws_config::defaults(BehaviorVersion::v2024_03_28())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint_url) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }
        let sdk_config = runtime.block_on(loader.load());

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style)
            .build();

        Ok(Self {
            runtime,
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn key(&self, name: &BackupName) -> String {
        format!("{}{name}", self.key_prefix)
    }

    fn put_single(&self, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        self.runtime
            .block_on(
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .body(ByteStream::from(body))
                    .send(),
            )
            .map_err(|e| StoreError::Remote(DisplayErrorContext(e).to_string(), "upload object"))?;

        Ok(())
    }

    /// Upload `first_part` and the rest of `reader` as parts of `upload_id`.
    fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        first_part: Vec<u8>,
        reader: &mut dyn Read,
    ) -> Result<(Vec<CompletedPart>, usize), StoreError> {
        let mut parts = Vec::new();
        let mut total_bytes = 0usize;
        let mut part = first_part;
        let mut part_number = 0;

        while !part.is_empty() {
            part_number += 1;
            if part_number > MAX_PARTS {
                return Err(StoreError::TooLarge(PART_SIZE.saturating_mul(10_000)));
            }

            let is_full = part.len() == PART_SIZE;
            total_bytes = total_bytes.saturating_add(part.len());

            let output = self
                .runtime
                .block_on(
                    self.client
                        .upload_part()
                        .bucket(&self.bucket)
                        .key(key)
                        .upload_id(upload_id)
                        .part_number(part_number)
                        .body(ByteStream::from(mem::take(&mut part)))
                        .send(),
                )
                .map_err(|e| StoreError::Remote(DisplayErrorContext(e).to_string(), "upload part"))?;

            trace!("Uploaded part {part_number} of {key}, {total_bytes} bytes so far");

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );

            if !is_full {
                break;
            }

            fill_part(reader, &mut part)?;
        }

        Ok((parts, total_bytes))
    }

    fn complete_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<(), StoreError> {
        self.runtime
            .block_on(
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send(),
            )
            .map_err(|e| {
                StoreError::Remote(DisplayErrorContext(e).to_string(), "complete upload")
            })?;

        Ok(())
    }

    fn abort_upload(&self, key: &str, upload_id: &str) {
        let result = self.runtime.block_on(
            self.client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .send(),
        );

        if let Err(error) = result {
            warn!(
                "Could not abort upload of {key}: {}",
                DisplayErrorContext(error)
            );
        }
    }
}

impl BackupStore for S3Store {
    fn location(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key_prefix)
    }

    fn list(&self, series: &Series) -> Result<Vec<BackupName>, StoreError> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&self.key_prefix)
            .into_paginator()
            .send();

        let mut names = Vec::new();
        while let Some(page) = self.runtime.block_on(pages.next()) {
            let page = page
                .map_err(|e| StoreError::Remote(DisplayErrorContext(e).to_string(), "list objects"))?;

            for object in page.contents() {
                let Some(file_name) = object
                    .key()
                    .and_then(|key| strip_key_prefix(key, &self.key_prefix))
                else {
                    continue;
                };

                match file_name.parse::<BackupName>() {
                    Ok(name) if name.belongs_to(series) => names.push(name),
                    Ok(_) => {}
                    Err(mismatch) => trace!("Skipping {file_name:?}: {mismatch}"),
                }
            }
        }

        Ok(names)
    }

    fn put(&self, name: &BackupName, reader: &mut dyn Read) -> Result<usize, StoreError> {
        let key = self.key(name);

        let mut first_part = Vec::new();
        fill_part(reader, &mut first_part)?;

        // Small dumps go up in one request, which is atomic on its own.
        if first_part.len() < PART_SIZE {
            let bytes = first_part.len();
            self.put_single(&key, first_part)?;
            debug!("Uploaded {bytes} bytes to {key}");
            return Ok(bytes);
        }

        // Multipart uploads only become visible once completed.
        let upload_id = self
            .runtime
            .block_on(
                self.client
                    .create_multipart_upload()
                    .bucket(&self.bucket)
                    .key(&key)
                    .send(),
            )
            .map_err(|e| StoreError::Remote(DisplayErrorContext(e).to_string(), "start upload"))?
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StoreError::Remote("no upload id returned".into(), "start upload"))?;

        let result = self
            .upload_parts(&key, &upload_id, first_part, reader)
            .and_then(|(parts, bytes)| {
                self.complete_upload(&key, &upload_id, parts)?;
                Ok(bytes)
            });

        match result {
            Ok(bytes) => {
                debug!("Uploaded {bytes} bytes to {key}");
                Ok(bytes)
            }
            Err(error) => {
                self.abort_upload(&key, &upload_id);
                Err(error)
            }
        }
    }

    fn delete(&self, name: &BackupName) -> Result<(), StoreError> {
        // Deleting a missing key succeeds in S3.
        self.runtime
            .block_on(
                self.client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(self.key(name))
                    .send(),
            )
            .map_err(|e| StoreError::Remote(DisplayErrorContext(e).to_string(), "delete object"))?;

        Ok(())
    }
}

/// Read up to [`PART_SIZE`] bytes from `reader` into `part`.
fn fill_part(reader: &mut dyn Read, part: &mut Vec<u8>) -> Result<(), StoreError> {
    part.clear();

    let mut chunk = vec![0u8; CHUNK_SIZE];
    while part.len() < PART_SIZE {
        let wanted = CHUNK_SIZE.min(PART_SIZE - part.len());
        let buffer = chunk.get_mut(..wanted).unwrap_or_default();

        let bytes_read = match reader.read(buffer) {
            Ok(0) => break,
            Ok(bytes_read) => bytes_read,
            Err(error) if error.kind() == ErrorKind::Interrupted => continue,
            Err(error) => return Err(StoreError::ReadDump(error)),
        };

        part.extend_from_slice(chunk.get(..bytes_read).unwrap_or_default());
    }

    Ok(())
}

/// The file name part of `key`, if the key sits directly under `prefix`.
fn strip_key_prefix<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    key.strip_prefix(prefix)
        .filter(|file_name| !file_name.is_empty() && !file_name.contains('/'))
}
