//! HTTP transport built on reqwest
//!
//! Each task streams its response body into a staged file under the
//! configured staging directory and reports every chunk to the delegate. It
//! handles:
//! - Redirects offered to the delegate instead of followed blindly
//! - Suspend/resume between chunks
//! - Cancellation, optionally keeping the partial file as resume data
//! - Continuing from resume data with `Range` / `If-Range`

use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{
    ACCEPT_RANGES, CONTENT_DISPOSITION, ETAG, HeaderMap, IF_RANGE, LAST_MODIFIED, LOCATION, RANGE,
};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tempfile::TempPath;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};
use url::Url;

use super::{
    RedirectDecision, ResponseInfo, ResumeData, ResumeDataCallback, TransferId, TransferRequest,
    Transport, TransportDelegate, TransportError, TransportTask,
};
use crate::config::HttpTransportConfig;
use crate::core::TransferState;

/// Failures while setting up an [`HttpTransport`]
#[derive(Error, Debug)]
pub enum HttpTransportError {
    #[error("Failed to create HTTP client")]
    Client(#[from] reqwest::Error),

    #[error("HttpTransport::new must be called from within a tokio runtime")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// Reference [`Transport`] speaking HTTP(S) through reqwest
pub struct HttpTransport {
    client: Client,
    runtime: Handle,
    config: Arc<HttpTransportConfig>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("config", &self.config)
            .finish()
    }
}

impl HttpTransport {
    /// Create a transport running its tasks on the current tokio runtime
    pub fn new(config: HttpTransportConfig) -> Result<Self, HttpTransportError> {
        let runtime = Handle::try_current()?;
        Self::with_runtime(config, runtime)
    }

    /// Create a transport running its tasks on `runtime`
    pub fn with_runtime(config: HttpTransportConfig, runtime: Handle) -> Result<Self, HttpTransportError> {
        // Redirects are offered to the delegate, so reqwest must not follow them.
        // No total deadline: a suspended task may sit idle for any length of time.
        let client = Client::builder()
            .read_timeout(config.read_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            runtime,
            config: Arc::new(config),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &HttpTransportConfig {
        &self.config
    }

    fn task(&self, origin: Origin, delegate: Weak<dyn TransportDelegate>) -> Arc<dyn TransportTask> {
        let id = TransferId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (state, _) = watch::channel(TransferState::Created);
        Arc::new(HttpTask {
            shared: Arc::new(TaskShared {
                id,
                client: self.client.clone(),
                runtime: self.runtime.clone(),
                config: self.config.clone(),
                origin,
                delegate,
                state,
                cancel: CancellationToken::new(),
                response: Mutex::new(None),
                resume_request: Mutex::new(None),
            }),
        })
    }
}

impl Transport for HttpTransport {
    fn create_task(&self, request: TransferRequest, delegate: Weak<dyn TransportDelegate>) -> Arc<dyn TransportTask> {
        self.task(Origin::Fresh(request), delegate)
    }

    fn create_task_with_resume_data(&self, data: ResumeData, delegate: Weak<dyn TransportDelegate>) -> Arc<dyn TransportTask> {
        let origin = match ResumeState::decode(&data) {
            Ok(state) => Origin::Resumed(state),
            Err(reason) => {
                warn!("Ignoring undecodable resume data: {}", reason);
                Origin::Invalid(reason)
            }
        };
        self.task(origin, delegate)
    }
}

/// Serialized form of [`ResumeData`] produced by this transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ResumeState {
    version: u32,
    request: TransferRequest,
    staged_path: PathBuf,
    bytes_written: u64,
    bytes_expected: Option<u64>,
    /// `ETag` or `Last-Modified` of the interrupted response
    validator: Option<String>,
    #[serde(default)]
    suggested_filename: Option<String>,
}

impl ResumeState {
    const VERSION: u32 = 1;

    fn encode(&self) -> ResumeData {
        // Serializing plain data into a Vec cannot fail
        ResumeData::from_bytes(serde_json::to_vec(self).unwrap_or_default())
    }

    fn decode(data: &ResumeData) -> Result<Self, String> {
        let state: ResumeState = serde_json::from_slice(data.as_bytes()).map_err(|e| e.to_string())?;
        if state.version != Self::VERSION {
            return Err(format!("unsupported resume data version {}", state.version));
        }
        Ok(state)
    }
}

enum Origin {
    Fresh(TransferRequest),
    Resumed(ResumeState),
    Invalid(String),
}

/// A partial file to continue writing to
struct Partial {
    path: PathBuf,
    offset: u64,
    validator: Option<String>,
}

/// The open staged file of a running task
struct Staging {
    file: tokio::fs::File,
    path: TempPath,
    written: u64,
}

struct TaskShared {
    id: TransferId,
    client: Client,
    runtime: Handle,
    config: Arc<HttpTransportConfig>,
    origin: Origin,
    delegate: Weak<dyn TransportDelegate>,
    state: watch::Sender<TransferState>,
    cancel: CancellationToken,
    response: Mutex<Option<ResponseInfo>>,
    resume_request: Mutex<Option<ResumeDataCallback>>,
}

struct HttpTask {
    shared: Arc<TaskShared>,
}

impl TransportTask for HttpTask {
    fn id(&self) -> TransferId {
        self.shared.id
    }

    fn state(&self) -> TransferState {
        *self.shared.state.borrow()
    }

    fn resume(&self) {
        let mut start = false;
        self.shared.state.send_if_modified(|state| match *state {
            TransferState::Created => {
                *state = TransferState::Running;
                start = true;
                true
            }
            TransferState::Suspended => {
                *state = TransferState::Running;
                true
            }
            _ => false,
        });

        if start {
            let shared = self.shared.clone();
            let span = info_span!("transfer", id = %shared.id, url = %shared.url_for_logs());
            self.shared.runtime.spawn(shared.run().instrument(span));
        }
    }

    fn suspend(&self) {
        self.shared.state.send_if_modified(|state| {
            if *state == TransferState::Running {
                *state = TransferState::Suspended;
                true
            } else {
                false
            }
        });
    }

    fn cancel(&self) {
        let mut never_started = false;
        self.shared.state.send_if_modified(|state| match *state {
            TransferState::Created => {
                never_started = true;
                *state = TransferState::Canceling;
                true
            }
            TransferState::Running | TransferState::Suspended => {
                *state = TransferState::Canceling;
                true
            }
            _ => false,
        });
        self.shared.cancel.cancel();

        if never_started {
            // No worker exists to report the outcome
            let shared = self.shared.clone();
            self.shared
                .runtime
                .spawn(async move { shared.complete(Some(TransportError::Cancelled)) });
        }
    }

    fn cancel_producing_resume_data(&self, on_data: ResumeDataCallback) {
        if matches!(self.state(), TransferState::Canceling | TransferState::Completed) {
            on_data(None);
            return;
        }
        *self.shared.resume_request.lock() = Some(on_data);
        self.cancel();

        // The worker may have finished between the check and the store
        if self.state() == TransferState::Completed {
            let unclaimed = self.shared.resume_request.lock().take();
            if let Some(on_data) = unclaimed {
                on_data(None);
            }
        }
    }

    fn original_request(&self) -> Option<TransferRequest> {
        match &self.shared.origin {
            Origin::Fresh(request) => Some(request.clone()),
            Origin::Resumed(state) => Some(state.request.clone()),
            Origin::Invalid(_) => None,
        }
    }

    fn response(&self) -> Option<ResponseInfo> {
        self.shared.response.lock().clone()
    }
}

impl TaskShared {
    fn url_for_logs(&self) -> String {
        match &self.origin {
            Origin::Fresh(request) => request.url.to_string(),
            Origin::Resumed(state) => state.request.url.to_string(),
            Origin::Invalid(_) => "<invalid resume data>".to_string(),
        }
    }

    async fn run(self: Arc<Self>) {
        let error = match self.download().await {
            Ok(staged) => {
                if let Some(delegate) = self.delegate.upgrade() {
                    delegate.did_finish_staging(self.id, &staged);
                }
                // Deletes the staged file unless the delegate moved it away
                drop(staged);
                None
            }
            Err(e) => Some(e),
        };
        self.complete(error);
    }

    fn complete(&self, error: Option<TransportError>) {
        self.state.send_replace(TransferState::Completed);

        let unclaimed = self.resume_request.lock().take();
        if let Some(on_data) = unclaimed {
            on_data(None);
        }

        match &error {
            Some(e) => debug!("Transfer {} finished with error: {}", self.id, e),
            None => debug!("Transfer {} finished", self.id),
        }
        if let Some(delegate) = self.delegate.upgrade() {
            delegate.did_complete(self.id, error);
        }
    }

    async fn download(&self) -> Result<TempPath, TransportError> {
        let (request, partial, earlier_filename) = match &self.origin {
            Origin::Fresh(request) => (request.clone(), None, None),
            Origin::Resumed(state) => {
                let partial = Partial {
                    path: state.staged_path.clone(),
                    offset: state.bytes_written,
                    validator: state.validator.clone(),
                };
                (state.request.clone(), Some(partial), state.suggested_filename.clone())
            }
            Origin::Invalid(reason) => {
                return Err(TransportError::InvalidResumeData { reason: reason.clone() });
            }
        };
        let partial = partial.filter(|partial| partial.offset > 0 && partial.path.is_file());

        let response = self.send(&request, partial.as_ref()).await?;
        let mut info = response_info(&response);
        if info.suggested_filename.is_none() {
            info.suggested_filename = earlier_filename;
        }
        let validator = validator(response.headers());
        let accepts_ranges = accepts_ranges(response.headers());
        debug!("Response HTTP {} ({:?} bytes)", info.status, info.expected_content_length);
        *self.response.lock() = Some(info.clone());

        let mut staging = self.open_staging(response.status(), partial).await?;
        let expected = info
            .expected_content_length
            .map(|length| length + staging.written);

        match self.stream_body(&request.url, response, &mut staging, expected).await {
            Ok(()) => Ok(staging.path),
            Err(TransportError::Cancelled) => {
                let resumable = info.is_success() && (accepts_ranges || validator.is_some());
                self.offer_resume_data(staging, &request, &info, expected, validator, resumable)
                    .await;
                Err(TransportError::Cancelled)
            }
            Err(e) => Err(e),
        }
    }

    /// Send the request, offering every redirect to the delegate
    async fn send(&self, request: &TransferRequest, partial: Option<&Partial>) -> Result<Response, TransportError> {
        let mut url = request.url.clone();
        let mut redirects = 0;

        loop {
            let mut builder = self.client.get(url.clone());
            for (key, value) in &request.headers {
                builder = builder.header(key.as_str(), value.as_str());
            }
            if let Some(partial) = partial {
                builder = builder.header(RANGE, format!("bytes={}-", partial.offset));
                if let Some(validator) = &partial.validator {
                    builder = builder.header(IF_RANGE, validator.as_str());
                }
                debug!("Requesting range: bytes={}-", partial.offset);
            }

            debug!("Requesting {}", url);
            let response = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
                response = builder.send() => response.map_err(|e| TransportError::from_reqwest(&url, e))?,
            };

            if !response.status().is_redirection() {
                return Ok(response);
            }
            let Some(location) = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
            else {
                return Ok(response);
            };
            let target = url.join(&location).map_err(|_| TransportError::InvalidRedirect {
                url: url.clone(),
                location: location.clone(),
            })?;

            let info = response_info(&response);
            let decision = self
                .delegate
                .upgrade()
                .map(|delegate| delegate.will_redirect(self.id, &info, &target))
                .unwrap_or(RedirectDecision::Refuse);
            if decision == RedirectDecision::Refuse {
                return Ok(response);
            }
            if redirects >= self.config.max_redirects {
                return Err(TransportError::TooManyRedirects {
                    url: request.url.clone(),
                    limit: self.config.max_redirects,
                });
            }
            redirects += 1;
            url = target;
        }
    }

    async fn open_staging(&self, status: StatusCode, partial: Option<Partial>) -> Result<Staging, TransportError> {
        if let Some(partial) = partial {
            if status == StatusCode::PARTIAL_CONTENT {
                debug!("Continuing {} at byte {}", partial.path.display(), partial.offset);
                let file = tokio::fs::OpenOptions::new()
                    .append(true)
                    .open(&partial.path)
                    .await
                    .map_err(|e| TransportError::staging(&partial.path, e))?;
                let path = TempPath::try_from_path(&partial.path)
                    .map_err(|e| TransportError::staging(&partial.path, e))?;
                return Ok(Staging {
                    file,
                    path,
                    written: partial.offset,
                });
            }
            debug!("Server ignored the range request, starting over");
            if let Err(e) = tokio::fs::remove_file(&partial.path).await {
                debug!("Could not remove stale partial file {}: {}", partial.path.display(), e);
            }
        }

        let staging_dir = &self.config.staging_dir;
        tokio::fs::create_dir_all(staging_dir)
            .await
            .map_err(|e| TransportError::staging(staging_dir, e))?;
        let named = tempfile::Builder::new()
            .prefix("transfer-")
            .suffix(".part")
            .tempfile_in(staging_dir)
            .map_err(|e| TransportError::staging(staging_dir, e))?;
        let (file, path) = named.into_parts();

        Ok(Staging {
            file: tokio::fs::File::from_std(file),
            path,
            written: 0,
        })
    }

    async fn stream_body(
        &self,
        url: &Url,
        response: Response,
        staging: &mut Staging,
        expected: Option<u64>,
    ) -> Result<(), TransportError> {
        let mut state = self.state.subscribe();
        let mut stream = response.bytes_stream();

        loop {
            self.wait_while_suspended(&mut state).await?;

            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|e| TransportError::from_reqwest(url, e))?;

            staging
                .file
                .write_all(&chunk)
                .await
                .map_err(|e| TransportError::staging(&staging.path, e))?;
            staging.written += chunk.len() as u64;

            if let Some(delegate) = self.delegate.upgrade() {
                delegate.did_write_data(self.id, staging.written, expected);
            }
        }

        staging
            .file
            .flush()
            .await
            .map_err(|e| TransportError::staging(&staging.path, e))?;
        staging
            .file
            .sync_all()
            .await
            .map_err(|e| TransportError::staging(&staging.path, e))?;

        debug!("Stream download completed: {} bytes", staging.written);
        Ok(())
    }

    async fn wait_while_suspended(&self, state: &mut watch::Receiver<TransferState>) -> Result<(), TransportError> {
        let current = state
            .wait_for(|state| *state != TransferState::Suspended)
            .await
            .map(|state| *state)
            .map_err(|_| TransportError::Cancelled)?;

        match current {
            TransferState::Canceling | TransferState::Completed => Err(TransportError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Hand the partial file to a pending `cancel_producing_resume_data` caller
    async fn offer_resume_data(
        &self,
        mut staging: Staging,
        request: &TransferRequest,
        info: &ResponseInfo,
        expected: Option<u64>,
        validator: Option<String>,
        resumable: bool,
    ) {
        let pending = self.resume_request.lock().take();
        let Some(on_data) = pending else {
            return;
        };

        if !resumable || staging.written == 0 {
            debug!("Transfer {} cannot be resumed", self.id);
            on_data(None);
            return;
        }
        if let Err(e) = staging.file.flush().await {
            warn!("Could not flush partial file {}: {}", staging.path.display(), e);
            on_data(None);
            return;
        }

        let Staging { file, path, written } = staging;
        drop(file);
        match path.keep() {
            Ok(staged_path) => {
                debug!("Keeping {} bytes in {} for resuming", written, staged_path.display());
                let state = ResumeState {
                    version: ResumeState::VERSION,
                    request: request.clone(),
                    staged_path,
                    bytes_written: written,
                    bytes_expected: expected,
                    validator,
                    suggested_filename: info.suggested_filename.clone(),
                };
                on_data(Some(state.encode()));
            }
            Err(e) => {
                warn!("Could not keep partial file: {}", e);
                on_data(None);
            }
        }
    }
}

fn response_info(response: &Response) -> ResponseInfo {
    let suggested_filename = response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok())
        .and_then(filename_from_disposition)
        .or_else(|| filename_from_url(response.url()));

    ResponseInfo {
        url: response.url().clone(),
        status: response.status().as_u16(),
        expected_content_length: response.content_length(),
        suggested_filename,
    }
}

fn validator(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ETAG)
        .or_else(|| headers.get(LAST_MODIFIED))
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn accepts_ranges(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT_RANGES)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("bytes"))
}

/// `filename=` parameter of a `Content-Disposition` header, without any path
fn filename_from_disposition(value: &str) -> Option<String> {
    value
        .split(';')
        .map(str::trim)
        .find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("filename")
                .then(|| value.trim().trim_matches('"').to_string())
        })
        .and_then(|name| sanitize_file_name(&name))
}

fn filename_from_url(url: &Url) -> Option<String> {
    url.path_segments()
        .and_then(|segments| segments.last())
        .filter(|segment| !segment.is_empty())
        .and_then(sanitize_file_name)
}

fn sanitize_file_name(name: &str) -> Option<String> {
    Path::new(name)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}
