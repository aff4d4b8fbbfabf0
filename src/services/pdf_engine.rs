use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

use crate::config::settings::PdfEngineConfig;
use crate::error::{AppError, AppResult};
use crate::models::identity::ResolvedIdentity;
use crate::models::plan::Plan;

/// PDF operations exposed behind the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdfOperation {
    Generate,
    GenerateStream,
    Templates,
    TemplatePreview,
    Merge,
    MergeUrls,
    Split,
    Compress,
    Rotate,
    Watermark,
    Secure,
    ToImages,
    FromImages,
    ExtractText,
    ExtractTextUrl,
    ExtractImages,
    ExtractImagesUrl,
    Metadata,
    MetadataUrl,
    Download,
    DownloadText,
    DownloadImages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMethod {
    Get,
    Post,
}

const MAX_RESOURCE_ID_LEN: usize = 128;

/// Template names and file ids are forwarded as a single path segment.
fn is_valid_resource_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_RESOURCE_ID_LEN
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl PdfOperation {
    /// Operations addressed by a single path segment.
    pub fn from_path_segment(segment: &str) -> Option<Self> {
        Some(match segment {
            "generate" => Self::Generate,
            "templates" => Self::Templates,
            "merge" => Self::Merge,
            "merge-urls" => Self::MergeUrls,
            "split" => Self::Split,
            "compress" => Self::Compress,
            "rotate" => Self::Rotate,
            "watermark" => Self::Watermark,
            "secure" => Self::Secure,
            "to-images" => Self::ToImages,
            "from-images" => Self::FromImages,
            "extract-text" => Self::ExtractText,
            "extract-text-url" => Self::ExtractTextUrl,
            "extract-images" => Self::ExtractImages,
            "extract-images-url" => Self::ExtractImagesUrl,
            "metadata" => Self::Metadata,
            "metadata-url" => Self::MetadataUrl,
            _ => return None,
        })
    }

    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::GenerateStream => "generate/stream",
            Self::Templates | Self::TemplatePreview => "templates",
            Self::Merge => "merge",
            Self::MergeUrls => "merge-urls",
            Self::Split => "split",
            Self::Compress => "compress",
            Self::Rotate => "rotate",
            Self::Watermark => "watermark",
            Self::Secure => "secure",
            Self::ToImages => "to-images",
            Self::FromImages => "from-images",
            Self::ExtractText => "extract-text",
            Self::ExtractTextUrl => "extract-text-url",
            Self::ExtractImages => "extract-images",
            Self::ExtractImagesUrl => "extract-images-url",
            Self::Metadata => "metadata",
            Self::MetadataUrl => "metadata-url",
            Self::Download => "download",
            Self::DownloadText => "download/text",
            Self::DownloadImages => "download/images",
        }
    }

    pub fn method(&self) -> OperationMethod {
        match self {
            Self::Templates
            | Self::TemplatePreview
            | Self::MetadataUrl
            | Self::Download
            | Self::DownloadText
            | Self::DownloadImages => OperationMethod::Get,
            _ => OperationMethod::Post,
        }
    }

    /// Lowest plan allowed to call the operation.
    pub fn required_plan(&self) -> Plan {
        match self {
            Self::Compress | Self::Watermark | Self::Secure => Plan::Pro,
            _ => Plan::Basic,
        }
    }

    /// Whether a raw `application/pdf` body is expected to be a single PDF.
    pub fn takes_pdf_input(&self) -> bool {
        matches!(
            self,
            Self::Merge
                | Self::Split
                | Self::Compress
                | Self::Rotate
                | Self::Watermark
                | Self::Secure
                | Self::ToImages
                | Self::ExtractText
                | Self::ExtractImages
                | Self::Metadata
        )
    }

    /// The engine answers these incrementally; the body is relayed as it arrives.
    pub fn streams_response(&self) -> bool {
        matches!(self, Self::GenerateStream)
    }
}

/// An operation plus the template name or file id it addresses, parsed from
/// the path below `/api/v1/pdf/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationTarget {
    pub operation: PdfOperation,
    pub resource: Option<String>,
}

impl OperationTarget {
    pub fn parse(path: &str) -> Option<Self> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let (operation, resource) = match segments.as_slice() {
            ["generate", "stream"] => (PdfOperation::GenerateStream, None),
            ["templates", name] => (PdfOperation::TemplatePreview, Some(*name)),
            ["download", "text", id] => (PdfOperation::DownloadText, Some(*id)),
            ["download", "images", id] => (PdfOperation::DownloadImages, Some(*id)),
            ["download", id] => (PdfOperation::Download, Some(*id)),
            [segment] => (PdfOperation::from_path_segment(segment)?, None),
            _ => return None,
        };

        if resource.is_some_and(|id| !is_valid_resource_id(id)) {
            return None;
        }

        Some(Self {
            operation,
            resource: resource.map(String::from),
        })
    }
}

pub type EngineStream = Pin<Box<dyn Stream<Item = Result<Bytes, AppError>> + Send + 'static>>;

#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub operation: PdfOperation,
    pub resource: Option<String>,
    pub identity: ResolvedIdentity,
    pub content_type: Option<String>,
    pub query: String,
    pub body: Bytes,
}

impl EngineRequest {
    /// Path relative to the engine base URL.
    pub fn engine_path(&self) -> String {
        match &self.resource {
            Some(resource) => format!("{}/{}", self.operation.path_segment(), resource),
            None => self.operation.path_segment().to_string(),
        }
    }
}

pub enum EngineBody {
    Full(Bytes),
    Stream(EngineStream),
}

impl fmt::Debug for EngineBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

#[derive(Debug)]
pub struct EngineResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: EngineBody,
}

/// The downstream PDF processor. Only ever called for admitted requests.
#[async_trait]
pub trait PdfEngine: Send + Sync {
    async fn execute(&self, request: EngineRequest) -> AppResult<EngineResponse>;
}

/// Forwards operations to an external PDF engine over HTTP.
pub struct HttpPdfEngine {
    client: Client,
    base_url: Url,
}

impl HttpPdfEngine {
    pub fn new(config: &PdfEngineConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        let mut base_url = config.base_url.clone();
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { client, base_url })
    }

    fn operation_url(&self, request: &EngineRequest) -> AppResult<Url> {
        let mut url = self
            .base_url
            .join(&request.engine_path())
            .map_err(|e| AppError::Internal(format!("Invalid PDF engine URL: {}", e)))?;
        if !request.query.is_empty() {
            url.set_query(Some(&request.query));
        }
        Ok(url)
    }
}

#[async_trait]
impl PdfEngine for HttpPdfEngine {
    async fn execute(&self, request: EngineRequest) -> AppResult<EngineResponse> {
        let url = self.operation_url(&request)?;
        let operation = request.operation;
        debug!(operation = operation.path_segment(), url = %url, "Forwarding to PDF engine");

        let mut builder = match operation.method() {
            OperationMethod::Get => self.client.get(url),
            OperationMethod::Post => self.client.post(url).body(request.body),
        };
        builder = builder
            .header("X-Gateway-Identity", &request.identity.identity_key)
            .header("X-Gateway-Plan", request.identity.plan.as_str());
        if let Some(content_type) = &request.content_type {
            builder = builder.header(reqwest::header::CONTENT_TYPE, content_type);
        }

        let response = builder.send().await.map_err(|e| {
            error!(operation = operation.path_segment(), error = %e, "PDF engine request failed");
            AppError::from(e)
        })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let body = if operation.streams_response() && status.is_success() {
            let stream = response.bytes_stream().map(|chunk| {
                chunk.map_err(|e| AppError::External(format!("PDF engine stream failed: {}", e)))
            });
            EngineBody::Stream(Box::pin(stream))
        } else {
            EngineBody::Full(response.bytes().await?)
        };

        Ok(EngineResponse {
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}
