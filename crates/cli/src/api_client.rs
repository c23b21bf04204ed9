use bytes::Bytes;
use pallet_core::content::{ContentResponse, ImportResponse};
use pallet_core::upload::{
    ImportRequest, OpenUploadRequest, OpenUploadResponse, UploadStatusResponse,
};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;

/// Failure talking to the pallet server.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Transport(reqwest::Error),

    #[error("API error ({status}) {code}: {message}")]
    Api {
        status: StatusCode,
        code: String,
        message: String,
    },
}

impl ClientError {
    /// Whether repeating the request may succeed: connection failures and
    /// 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::InvalidUrl(_) => false,
            Self::Transport(_) => true,
            Self::Api { status, .. } => status.is_server_error(),
        }
    }

    /// Machine-readable error code from the server, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Result of `POST /v1/uploads`.
#[derive(Debug, Clone)]
pub struct OpenedUpload {
    pub upload_id: String,
    pub offset: u64,
    /// True when the server re-attached an existing session.
    pub resumed: bool,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("invalid server URL {base_url}: {e}"))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::InvalidUrl(format!("{path}: {e}")))
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, ClientError> {
        let response = req.send().await.map_err(ClientError::Transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(err) => (err.code, err.message),
            Err(_) => (status.as_u16().to_string(), body),
        };
        Err(ClientError::Api {
            status,
            code,
            message,
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = self.send(req).await?;
        response.json().await.map_err(ClientError::Transport)
    }

    pub async fn open_upload(&self, req: &OpenUploadRequest) -> Result<OpenedUpload, ClientError> {
        let url = self.url("/v1/uploads")?;
        let response = self.send(self.http.post(url).json(req)).await?;
        let resumed = response.status() == StatusCode::OK;
        let body: OpenUploadResponse = response.json().await.map_err(ClientError::Transport)?;
        Ok(OpenedUpload {
            upload_id: body.upload_id,
            offset: body.offset,
            resumed,
        })
    }

    pub async fn append(&self, upload_id: &str, data: Bytes) -> Result<(), ClientError> {
        let url = self.url(&format!("/v1/uploads/{upload_id}/append"))?;
        let _: bool = self
            .send_json(
                self.http
                    .put(url)
                    .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                    .body(data),
            )
            .await?;
        Ok(())
    }

    pub async fn import(&self, req: &ImportRequest) -> Result<ImportResponse, ClientError> {
        let url = self.url("/v1/uploads/import")?;
        self.send_json(self.http.post(url).json(req)).await
    }

    pub async fn get_upload(&self, upload_id: &str) -> Result<UploadStatusResponse, ClientError> {
        let url = self.url(&format!("/v1/uploads/{upload_id}"))?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn abort(&self, upload_id: &str) -> Result<(), ClientError> {
        let url = self.url(&format!("/v1/uploads/{upload_id}"))?;
        self.send(self.http.delete(url)).await?;
        Ok(())
    }

    pub async fn get_content(&self, checksum: &str) -> Result<ContentResponse, ClientError> {
        let url = self.url(&format!("/v1/content/{checksum}"))?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn health(&self) -> Result<serde_json::Value, ClientError> {
        let url = self.url("/v1/health")?;
        self.send_json(self.http.get(url)).await
    }
}
