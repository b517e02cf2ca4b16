//! A slot on a remote conversion service.
//!
//! The service speaks the LibreOffice Online `convert-to` protocol: the
//! source file is POSTed as multipart form data to
//! `<base>/lool/convert-to/<target extension>` and the response body is the
//! converted document.
//!
//! | part          | content                                   |
//! |---------------|-------------------------------------------|
//! | `data`        | source bytes, with the source file name   |
//! | `format`      | target extension                          |
//! | `l<Name>`     | one load property                         |
//! | `s<Name>`     | one store property                        |
//! | `sfd<Name>`   | one entry of the `FilterData` store property |
//!
//! There is no process to supervise: starting a [`RemoteWorker`] builds its
//! HTTP client, stopping it drops the client.

use super::Worker;
use crate::config::{RemoteOfficeConfig, SslConfig};
use crate::error::OfficeError;
use crate::format::Properties;
use crate::task::{OfficeContext, OfficeTask};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Store property whose entries are sent one by one.
const FILTER_DATA: &str = "FilterData";

/// Longest error body quoted in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Appends the `convert-to` path to a service URL unless it is already
/// there. The result always ends with `/`.
///
/// ```rust
/// use officeconv::worker::normalize_url;
///
/// assert_eq!(normalize_url("http://host:9980"), "http://host:9980/lool/convert-to/");
/// assert_eq!(normalize_url("http://host/lool"), "http://host/lool/convert-to/");
/// ```
pub fn normalize_url(url: &str) -> String {
    let lower = url.to_ascii_lowercase();
    if lower.ends_with("lool/convert-to/") {
        url.to_string()
    } else if lower.ends_with("lool/convert-to") {
        format!("{url}/")
    } else if lower.ends_with("lool/") {
        format!("{url}convert-to/")
    } else if lower.ends_with("lool") {
        format!("{url}/convert-to/")
    } else if url.ends_with('/') {
        format!("{url}lool/convert-to/")
    } else {
        format!("{url}/lool/convert-to/")
    }
}

// ── Connection ───────────────────────────────────────────────────────────

/// HTTP client bound to one conversion service.
#[derive(Debug, Clone)]
pub struct RemoteConnection {
    client: reqwest::Client,
    url: String,
}

impl RemoteConnection {
    /// Builds the client: timeouts, then TLS material read from disk.
    pub async fn open(config: &RemoteOfficeConfig) -> Result<Self, OfficeError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.socket_timeout);
        if let Some(ssl) = &config.ssl {
            builder = configure_tls(builder, ssl).await?;
        }
        let client = builder
            .build()
            .map_err(|e| OfficeError::Configuration(format!("Could not build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: normalize_url(&config.url),
        })
    }

    /// Normalised base URL, ending with `convert-to/`.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// URL converting into `extension`.
    pub fn conversion_url(&self, extension: &str) -> String {
        format!("{}{}", self.url, extension)
    }

    /// Sends `source_file` and writes the converted bytes into `target_file`.
    pub async fn convert(
        &self,
        source_file: &Path,
        target_file: &Path,
        extension: &str,
        load_properties: &Properties,
        store_properties: &Properties,
    ) -> Result<(), OfficeError> {
        let url = self.conversion_url(extension);
        let form = build_form(
            source_file,
            extension,
            load_properties,
            store_properties,
        )
        .await?;

        debug!("POST {} ({})", url, source_file.display());
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| OfficeError::connection(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|&i| body.is_char_boundary(i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(OfficeError::conversion(format!(
                "Remote conversion failed with HTTP {status}: {}",
                body.trim()
            )));
        }

        let mut file = tokio::fs::File::create(target_file)
            .await
            .map_err(|e| specs_io(target_file, e))?;
        let mut body = response.bytes_stream();
        let mut written = 0usize;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| OfficeError::connection(url.as_str(), e))?;
            written += chunk.len();
            file.write_all(&chunk)
                .await
                .map_err(|e| specs_io(target_file, e))?;
        }
        file.flush().await.map_err(|e| specs_io(target_file, e))?;
        debug!("Received {} bytes into {}", written, target_file.display());
        Ok(())
    }
}

async fn configure_tls(
    mut builder: reqwest::ClientBuilder,
    ssl: &SslConfig,
) -> Result<reqwest::ClientBuilder, OfficeError> {
    if ssl.trust_all {
        warn!("TLS certificate verification is disabled for the remote office");
        builder = builder.danger_accept_invalid_certs(true);
    }
    if !ssl.verify_hostname {
        builder = builder.danger_accept_invalid_hostnames(true);
    }
    if let Some(path) = &ssl.trust_store {
        let pem = tokio::fs::read(path).await.map_err(|e| specs_io(path, e))?;
        let certificates = reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
            OfficeError::Configuration(format!("Invalid trust store '{}': {e}", path.display()))
        })?;
        for certificate in certificates {
            builder = builder.add_root_certificate(certificate);
        }
    }
    if let Some(path) = &ssl.identity {
        let pem = tokio::fs::read(path).await.map_err(|e| specs_io(path, e))?;
        let identity = reqwest::Identity::from_pem(&pem).map_err(|e| {
            OfficeError::Configuration(format!("Invalid client identity '{}': {e}", path.display()))
        })?;
        builder = builder.identity(identity);
    }
    Ok(builder)
}

async fn build_form(
    source_file: &Path,
    extension: &str,
    load_properties: &Properties,
    store_properties: &Properties,
) -> Result<Form, OfficeError> {
    let bytes = tokio::fs::read(source_file)
        .await
        .map_err(|e| specs_io(source_file, e))?;
    let file_name = source_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());

    let mut form = Form::new()
        .part("data", Part::bytes(bytes).file_name(file_name))
        .text("format", extension.to_string());
    for (name, value) in form_fields(load_properties, store_properties) {
        form = form.text(name, value);
    }
    Ok(form)
}

/// Text parts carrying the load and store properties.
pub(crate) fn form_fields(
    load_properties: &Properties,
    store_properties: &Properties,
) -> Vec<(String, String)> {
    let mut fields: Vec<(String, String)> = load_properties
        .iter()
        .map(|(name, value)| (format!("l{name}"), param_value(value)))
        .collect();
    for (name, value) in store_properties {
        match (name.as_str(), value) {
            (FILTER_DATA, Value::Object(entries)) => fields.extend(
                entries
                    .iter()
                    .map(|(key, value)| (format!("sfd{key}"), param_value(value))),
            ),
            _ => fields.push((format!("s{name}"), param_value(value))),
        }
    }
    fields
}

fn param_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn specs_io(path: &Path, source: std::io::Error) -> OfficeError {
    OfficeError::SpecsIo {
        path: path.to_path_buf(),
        source,
    }
}

// ── Worker ───────────────────────────────────────────────────────────────

/// One concurrent request slot against a conversion service.
pub struct RemoteWorker {
    index: usize,
    config: Arc<RemoteOfficeConfig>,
    connection: Option<RemoteConnection>,
}

impl RemoteWorker {
    pub fn new(index: usize, config: Arc<RemoteOfficeConfig>) -> Self {
        Self {
            index,
            config,
            connection: None,
        }
    }
}

#[async_trait]
impl Worker for RemoteWorker {
    async fn start(&mut self) -> Result<(), OfficeError> {
        if self.connection.is_none() {
            let connection = RemoteConnection::open(&self.config).await?;
            info!("Remote office slot {} ready at {}", self.index, connection.url());
            self.connection = Some(connection);
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), OfficeError> {
        if self.connection.take().is_some() {
            debug!("Remote office slot {} stopped", self.index);
        }
        Ok(())
    }

    async fn is_ready(&mut self) -> bool {
        self.connection.is_some()
    }

    async fn execute(&mut self, task: &mut dyn OfficeTask) -> Result<(), OfficeError> {
        let connection = self.connection.as_ref().ok_or_else(|| {
            OfficeError::connection(self.config.url.as_str(), "remote office slot is not started")
        })?;
        task.execute(OfficeContext::remote(&self.config.pool.working_dir, connection))
            .await
    }

    fn describe(&self) -> String {
        format!("remote office slot {} at {}", self.index, self.config.url)
    }
}
