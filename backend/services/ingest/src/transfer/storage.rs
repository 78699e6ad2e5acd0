use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use object_store::azure::{AzureConfigKey, MicrosoftAzureBuilder};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, WriteMultipart};
use reqwest::header::CONTENT_LENGTH;
use reqwest::StatusCode;

use docsync_common::error::{DocsyncError, DocsyncResult};
use docsync_config::StorageSettings;

use super::TransferError;

/// Upper bound on multipart parts uploading at once for a single object.
const MAX_IN_FLIGHT_PARTS: usize = 4;

const AZURE_API_VERSION: &str = "2021-08-06";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
enum Backend {
    Azure {
        endpoint: String,
        container: String,
        sas_token: String,
    },
    Local {
        root: String,
        container: String,
    },
    Memory {
        container: String,
    },
}

/// Object storage for attachment payloads, one container per run.
#[derive(Clone)]
pub struct BlobStorage {
    store: Arc<dyn ObjectStore>,
    backend: Backend,
    chunk_bytes: usize,
    request_timeout: Duration,
    http: reqwest::Client,
}

impl BlobStorage {
    pub fn from_settings(settings: &StorageSettings, chunk_bytes: usize) -> DocsyncResult<Self> {
        match settings {
            StorageSettings::Azure {
                account,
                container,
                sas_token,
            } => Self::azure(
                account,
                container,
                sas_token,
                format!("https://{account}.blob.core.windows.net"),
                chunk_bytes,
            ),
            StorageSettings::Local { root, container } => Self::local(root, container, chunk_bytes),
        }
    }

    /// Azure backend whose container endpoint is `endpoint`.
    pub fn azure(
        account: &str,
        container: &str,
        sas_token: &str,
        endpoint: String,
        chunk_bytes: usize,
    ) -> DocsyncResult<Self> {
        let store = MicrosoftAzureBuilder::new()
            .with_account(account)
            .with_container_name(container)
            .with_config(AzureConfigKey::SasKey, sas_token)
            .build()
            .map_err(|e| DocsyncError::Config(format!("azure storage: {e}")))?;

        Ok(Self {
            store: Arc::new(store),
            backend: Backend::Azure {
                endpoint: endpoint.trim_end_matches('/').to_string(),
                container: container.to_string(),
                sas_token: sas_token.to_string(),
            },
            chunk_bytes: chunk_bytes.max(1),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            http: reqwest::Client::new(),
        })
    }

    pub fn local(root: &str, container: &str, chunk_bytes: usize) -> DocsyncResult<Self> {
        let dir = PathBuf::from(root).join(container);
        std::fs::create_dir_all(&dir)
            .map_err(|e| DocsyncError::Config(format!("local storage {}: {e}", dir.display())))?;
        let store = LocalFileSystem::new_with_prefix(&dir)
            .map_err(|e| DocsyncError::Config(format!("local storage {}: {e}", dir.display())))?;

        let root = std::fs::canonicalize(root)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| root.trim_end_matches('/').to_string());

        Ok(Self {
            store: Arc::new(store),
            backend: Backend::Local {
                root,
                container: container.to_string(),
            },
            chunk_bytes: chunk_bytes.max(1),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            http: reqwest::Client::new(),
        })
    }

    pub fn in_memory(container: &str, chunk_bytes: usize) -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            backend: Backend::Memory {
                container: container.to_string(),
            },
            chunk_bytes: chunk_bytes.max(1),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            http: reqwest::Client::new(),
        }
    }

    /// Bound on container management requests.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn container(&self) -> &str {
        match &self.backend {
            Backend::Azure { container, .. }
            | Backend::Local { container, .. }
            | Backend::Memory { container } => container,
        }
    }

    /// Create the container if it does not exist yet.
    pub async fn ensure_container(&self) -> DocsyncResult<()> {
        match &self.backend {
            Backend::Azure {
                endpoint,
                container,
                sas_token,
            } => {
                let url = format!("{endpoint}/{container}?restype=container&{sas_token}");
                let request = self
                    .http
                    .put(url)
                    .header("x-ms-version", AZURE_API_VERSION)
                    .header(CONTENT_LENGTH, 0)
                    .timeout(self.request_timeout)
                    .send();
                let response = tokio::time::timeout(self.request_timeout, request)
                    .await
                    .map_err(|_| {
                        DocsyncError::Internal(format!(
                            "create container {container}: timed out after {:?}",
                            self.request_timeout
                        ))
                    })?
                    .map_err(|e| DocsyncError::Internal(format!("create container: {e}")))?;

                match response.status() {
                    StatusCode::CREATED => {
                        tracing::info!(container = %container, "created storage container");
                        Ok(())
                    }
                    StatusCode::CONFLICT => {
                        tracing::debug!(container = %container, "storage container exists");
                        Ok(())
                    }
                    status @ (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                        let body = response.text().await.unwrap_or_default();
                        Err(DocsyncError::Auth(format!(
                            "storage rejected SAS token with HTTP {status}: {body}"
                        )))
                    }
                    status => {
                        let body = response.text().await.unwrap_or_default();
                        Err(DocsyncError::Internal(format!(
                            "create container {container}: HTTP {status}: {body}"
                        )))
                    }
                }
            }
            Backend::Local { root, container } => {
                let dir = PathBuf::from(root).join(container);
                tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                    DocsyncError::Internal(format!("create {}: {e}", dir.display()))
                })
            }
            Backend::Memory { .. } => Ok(()),
        }
    }

    pub fn reference_url(&self, name: &str) -> String {
        match &self.backend {
            Backend::Azure {
                endpoint,
                container,
                ..
            } => format!("{endpoint}/{container}/{name}"),
            Backend::Local { root, container } => format!("file://{root}/{container}/{name}"),
            Backend::Memory { container } => format!("memory:///{container}/{name}"),
        }
    }

    /// Stream `body` into object `name`, overwriting any existing object,
    /// and return its reference URL. A failing body aborts the upload.
    pub async fn upload_stream<S, E>(&self, name: &str, body: S) -> Result<String, TransferError>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Display,
    {
        let mut body = std::pin::pin!(body);
        let path = Path::from(name);
        let upload = self
            .store
            .put_multipart(&path)
            .await
            .map_err(|e| TransferError::Internal(format!("start upload {name}: {e}")))?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, self.chunk_bytes);
        let mut total_bytes = 0usize;

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    if let Err(abort_err) = writer.abort().await {
                        tracing::warn!(object = name, error = %abort_err, "failed to abort upload");
                    }
                    return Err(TransferError::Network(format!("payload stream: {e}")));
                }
            };

            if let Err(e) = writer.wait_for_capacity(MAX_IN_FLIGHT_PARTS).await {
                if let Err(abort_err) = writer.abort().await {
                    tracing::warn!(object = name, error = %abort_err, "failed to abort upload");
                }
                return Err(TransferError::Internal(format!("upload {name}: {e}")));
            }
            total_bytes += chunk.len();
            writer.write(&chunk);
        }

        writer
            .finish()
            .await
            .map_err(|e| TransferError::Internal(format!("finish upload {name}: {e}")))?;

        tracing::debug!(object = name, bytes = total_bytes, "uploaded payload");
        Ok(self.reference_url(name))
    }

    #[cfg(test)]
    pub async fn read(&self, name: &str) -> object_store::Result<Bytes> {
        self.store.get(&Path::from(name)).await?.bytes().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = Result<Bytes, String>> + Unpin + Send {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok::<_, String>(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn upload_concatenates_chunks() {
        let storage = BlobStorage::in_memory("content", 8);
        let url = storage
            .upload_stream("a_b.txt", chunks(&["hello ", "multipart ", "world"]))
            .await
            .unwrap();

        assert_eq!(url, "memory:///content/a_b.txt");
        let stored = storage.read("a_b.txt").await.unwrap();
        assert_eq!(&stored[..], b"hello multipart world");
    }

    #[tokio::test]
    async fn upload_overwrites_existing_object() {
        let storage = BlobStorage::in_memory("content", 1024);
        storage.upload_stream("x.bin", chunks(&["first"])).await.unwrap();
        storage.upload_stream("x.bin", chunks(&["second"])).await.unwrap();

        assert_eq!(&storage.read("x.bin").await.unwrap()[..], b"second");
    }

    #[tokio::test]
    async fn failing_body_is_network_error_and_leaves_no_object() {
        let storage = BlobStorage::in_memory("content", 1024);
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err("connection reset".to_string()),
        ]);

        let err = storage.upload_stream("y.bin", body).await.unwrap_err();
        assert!(matches!(err, TransferError::Network(ref m) if m.contains("connection reset")));
        assert!(storage.read("y.bin").await.is_err());
    }

    #[test]
    fn reference_urls_per_backend() {
        let memory = BlobStorage::in_memory("content", 1024);
        assert_eq!(memory.reference_url("n.pdf"), "memory:///content/n.pdf");

        let azure = BlobStorage::azure(
            "acct",
            "docs",
            "sv=2022&sig=abc",
            "https://acct.blob.core.windows.net".to_string(),
            1024,
        )
        .unwrap();
        assert_eq!(
            azure.reference_url("n.pdf"),
            "https://acct.blob.core.windows.net/docs/n.pdf"
        );
        assert_eq!(azure.container(), "docs");
    }

    #[tokio::test]
    async fn local_backend_writes_under_container() {
        let root = std::env::temp_dir().join(format!("docsync-{}", uuid::Uuid::new_v4()));
        let root_str = root.to_string_lossy().to_string();
        let storage = BlobStorage::local(&root_str, "content", 1024).unwrap();
        storage.ensure_container().await.unwrap();

        let url = storage.upload_stream("f.txt", chunks(&["local"])).await.unwrap();
        assert_eq!(url, format!("file://{root_str}/content/f.txt"));
        let on_disk = std::fs::read(root.join("content").join("f.txt")).unwrap();
        assert_eq!(on_disk, b"local");

        let _ = std::fs::remove_dir_all(&root);
    }

    async fn azure_with_status(status: u16) -> (MockServer, BlobStorage) {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/docs"))
            .and(query_param("restype", "container"))
            .and(query_param("sig", "abc"))
            .respond_with(ResponseTemplate::new(status))
            .expect(1)
            .mount(&server)
            .await;
        let storage = BlobStorage::azure("acct", "docs", "sv=2022&sig=abc", server.uri(), 1024).unwrap();
        (server, storage)
    }

    #[tokio::test]
    async fn azure_container_created() {
        let (_server, storage) = azure_with_status(201).await;
        storage.ensure_container().await.unwrap();
    }

    #[tokio::test]
    async fn azure_container_already_exists_is_ok() {
        let (_server, storage) = azure_with_status(409).await;
        storage.ensure_container().await.unwrap();
    }

    #[tokio::test]
    async fn azure_rejected_sas_is_auth_error() {
        let (_server, storage) = azure_with_status(403).await;
        let err = storage.ensure_container().await.unwrap_err();
        assert!(matches!(err, DocsyncError::Auth(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn unresponsive_container_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/docs"))
            .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_secs(10)))
            .mount(&server)
            .await;
        let storage = BlobStorage::azure("acct", "docs", "sv=2022&sig=abc", server.uri(), 1024)
            .unwrap()
            .with_request_timeout(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let err = storage.ensure_container().await.unwrap_err();
        assert!(matches!(err, DocsyncError::Internal(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn zero_chunk_size_still_uploads() {
        let storage = BlobStorage::in_memory("content", 0);
        let upload = storage.upload_stream("z.bin", chunks(&["abc"]));
        let url = tokio::time::timeout(Duration::from_secs(5), upload)
            .await
            .expect("upload finished")
            .unwrap();

        assert_eq!(url, "memory:///content/z.bin");
        assert_eq!(&storage.read("z.bin").await.unwrap()[..], b"abc");
    }

    #[tokio::test]
    async fn memory_container_is_noop() {
        BlobStorage::in_memory("content", 1024)
            .ensure_container()
            .await
            .unwrap();
    }
}
