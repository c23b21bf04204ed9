//! Resumable file upload.

use crate::api_client::{ApiClient, ClientError};
use anyhow::{Context, Result};
use bytes::Bytes;
use pallet_core::Checksum;
use pallet_core::upload::{ImportRequest, OpenUploadRequest};
use std::cell::Cell;
use std::future::Future;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

const HASH_BUFFER_SIZE: usize = 1024 * 1024;

/// How a push talks to the server.
#[derive(Debug, Clone)]
pub struct PushOptions {
    pub file: PathBuf,
    /// Declared name; defaults to the file name.
    pub name: Option<String>,
    /// Session to resume.
    pub upload_id: Option<String>,
    pub chunk_size: usize,
    pub metadata: serde_json::Value,
    pub repo_id: Option<String>,
    pub retry: RetryConfig,
}

/// Bounded retry of transient request failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based): 1x, 2x, 4x the base.
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}

/// Outcome of a completed push.
#[derive(Debug, Clone)]
pub struct PushOutcome {
    pub upload_id: String,
    pub checksum: String,
    pub size: u64,
    pub storage_location: String,
    /// Unknown when the import response was lost and the result was
    /// recovered by looking the content up.
    pub deduplicated: Option<bool>,
    /// Offset the server reported when the session was opened.
    pub resumed_from: u64,
}

/// Repeat `op` while it fails transiently, up to `retry.max_retries` times.
pub async fn retry_request<T, F, Fut>(
    retry: &RetryConfig,
    what: &str,
    mut op: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < retry.max_retries => {
                attempt += 1;
                let delay = retry.delay(attempt);
                eprintln!("  {what} failed ({e}), retrying in {}ms...", delay.as_millis());
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// SHA-256 and length of the file at `path`.
pub async fn hash_file(path: &Path) -> Result<(Checksum, u64)> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Checksum::hasher();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    let mut size = 0u64;
    loop {
        let n = file
            .read(&mut buf)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((hasher.finalize(), size))
}

/// Read up to `len` bytes of `file` starting at `offset`.
async fn read_chunk(file: &mut tokio::fs::File, offset: u64, len: usize) -> Result<Bytes> {
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = Vec::with_capacity(len);
    (&mut *file).take(len as u64).read_to_end(&mut buf).await?;
    Ok(Bytes::from(buf))
}

/// Upload a file, resuming a previous session when `upload_id` is set.
///
/// After a transient append failure the server's offset is re-read before
/// sending more bytes, since the failed request may still have landed.
pub async fn push_file(client: &ApiClient, opts: &PushOptions) -> Result<PushOutcome> {
    anyhow::ensure!(opts.chunk_size > 0, "chunk size must be greater than zero");

    let (checksum, size) = hash_file(&opts.file).await?;
    let name = match &opts.name {
        Some(name) => name.clone(),
        None => opts
            .file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("file has no name; pass --name")?,
    };
    let checksum_hex = checksum.to_hex();

    let open_req = OpenUploadRequest {
        name,
        checksum: checksum_hex.clone(),
        size: i64::try_from(size).context("file too large")?,
        upload_id: opts.upload_id.clone(),
    };
    let opened = retry_request(&opts.retry, "open", || client.open_upload(&open_req))
        .await
        .context("failed to open upload session")?;
    let upload_id = opened.upload_id.clone();
    if opened.resumed {
        println!("Resuming upload {upload_id} at offset {}/{size}", opened.offset);
    } else {
        println!("Opened upload {upload_id} ({size} bytes)");
    }

    let mut file = tokio::fs::File::open(&opts.file)
        .await
        .with_context(|| format!("failed to open {}", opts.file.display()))?;
    let mut offset = opened.offset;
    let mut failures = 0;
    while offset < size {
        let chunk = read_chunk(&mut file, offset, opts.chunk_size).await?;
        let len = chunk.len() as u64;
        anyhow::ensure!(len > 0, "{} shrank during upload", opts.file.display());

        match client.append(&upload_id, chunk).await {
            Ok(()) => {
                offset += len;
                failures = 0;
                println!("  {offset}/{size} bytes");
            }
            Err(e) if e.is_transient() && failures < opts.retry.max_retries => {
                failures += 1;
                let delay = opts.retry.delay(failures);
                eprintln!("  append failed ({e}), retrying in {}ms...", delay.as_millis());
                tokio::time::sleep(delay).await;
                offset = retry_request(&opts.retry, "status", || client.get_upload(&upload_id))
                    .await
                    .with_context(|| resume_hint(&upload_id))?
                    .offset;
            }
            Err(e) => return Err(e).with_context(|| resume_hint(&upload_id)),
        }
    }

    let import_req = ImportRequest {
        upload_id: upload_id.clone(),
        metadata: opts.metadata.clone(),
        repo_id: opts.repo_id.clone(),
    };
    let lost_response = Cell::new(false);
    let (lost, req) = (&lost_response, &import_req);
    let imported = retry_request(&opts.retry, "import", move || async move {
        let result = client.import(req).await;
        if matches!(&result, Err(e) if e.is_transient()) {
            lost.set(true);
        }
        result
    })
    .await;

    match imported {
        Ok(resp) => Ok(PushOutcome {
            upload_id,
            checksum: resp.checksum,
            size: resp.size,
            storage_location: resp.storage_location,
            deduplicated: Some(resp.deduplicated),
            resumed_from: opened.offset,
        }),
        // An earlier attempt finalized the session but its response was lost.
        Err(e) if lost_response.get() && e.code() == Some("not_found") => {
            let content = client
                .get_content(&checksum_hex)
                .await
                .context("import outcome unknown")?;
            Ok(PushOutcome {
                upload_id,
                checksum: content.checksum,
                size: content.size,
                storage_location: content.storage_location,
                deduplicated: None,
                resumed_from: opened.offset,
            })
        }
        Err(e) => Err(e).context("import failed"),
    }
}

fn resume_hint(upload_id: &str) -> String {
    format!("upload interrupted; resume with --upload-id {upload_id}")
}
