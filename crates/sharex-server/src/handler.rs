use std::io::{self, Write};
use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, Multipart, Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{Json, Response};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sharex_storage::{
    Author, CallReference, Entry, EntryWriter, LazyReader, StorageError, StorageResult,
};
use tokio::sync::mpsc;
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};

use crate::error::{ServerError, ServerResult};
use crate::state::AppState;

/// Multipart field carrying the uploaded file.
pub const FILE_FIELD: &str = "file";

/// Content type recorded when the upload does not name one.
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Chunks buffered between the async and blocking halves of a transfer.
const CHANNEL_CAPACITY: usize = 16;

const READ_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub engine: String,
    pub version: String,
}

/// Health check handler.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        engine: state.engine.name().into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

enum UploadChunk {
    Data(Bytes),
    Done,
}

/// Accept a multipart upload and answer with the bare call reference.
pub async fn upload_handler(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ServerResult<String> {
    let client = state.client_address(&headers, peer.map(|ConnectInfo(addr)| addr));

    let mut field = loop {
        match multipart
            .next_field()
            .await
            .map_err(|e| ServerError::Upload(e.body_text()))?
        {
            Some(field) if field.name() == Some(FILE_FIELD) => break field,
            Some(_) => continue,
            None => return Err(ServerError::Upload(format!("missing form field {FILE_FIELD:?}"))),
        }
    };
    let filename = field.file_name().unwrap_or_default().to_owned();
    let content_type = field
        .content_type()
        .unwrap_or(FALLBACK_CONTENT_TYPE)
        .to_owned();

    let engine = state.engine.clone();
    let (entry, writer) = spawn_blocking(move || {
        let mut entry = Entry::new(Author::anonymous(), filename, content_type);
        let writer = engine.store(&mut entry)?;
        Ok::<_, StorageError>((entry, writer))
    })
    .await??;
    let reference = entry
        .call_reference
        .clone()
        .ok_or_else(|| ServerError::Internal("stored entry has no call reference".into()))?;

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let writer_task = spawn_blocking(move || write_upload(writer, rx));

    let fed = async {
        while let Some(bytes) = field
            .chunk()
            .await
            .map_err(|e| ServerError::Upload(e.body_text()))?
        {
            if tx.send(UploadChunk::Data(bytes)).await.is_err() {
                // The writer stopped early; its result says why.
                return Ok(());
            }
        }
        let _ = tx.send(UploadChunk::Done).await;
        Ok::<_, ServerError>(())
    }
    .await;
    drop(tx);

    let written = writer_task.await?;
    fed?;
    let total = written?;

    info!(
        client = %client,
        call_reference = %reference,
        filename = %entry.filename,
        content_type = %entry.content_type,
        bytes = total,
        "created entry"
    );
    Ok(reference.into_string())
}

/// Drain upload chunks into the entry writer. Closes the writer once the
/// upload is complete; aborts it if the stream ends early.
fn write_upload(
    mut writer: Box<dyn EntryWriter>,
    mut rx: mpsc::Receiver<UploadChunk>,
) -> StorageResult<u64> {
    let mut total = 0u64;
    while let Some(chunk) = rx.blocking_recv() {
        match chunk {
            UploadChunk::Data(bytes) => {
                if let Err(err) = writer.write_all(&bytes) {
                    writer.abort()?;
                    return Err(StorageError::Write(err));
                }
                total += bytes.len() as u64;
            }
            UploadChunk::Done => {
                writer.close()?;
                return Ok(total);
            }
        }
    }
    debug!(bytes = total, "upload interrupted, aborting entry");
    writer.abort()?;
    Err(StorageError::Write(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "upload ended before completion",
    )))
}

/// Serve the bytes of an entry.
pub async fn download_handler(
    State(state): State<AppState>,
    Path(call_reference): Path<String>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> ServerResult<Response> {
    if CallReference::parse(&call_reference).is_err() {
        return Err(ServerError::NotFound(call_reference));
    }
    let client = state.client_address(&headers, peer.map(|ConnectInfo(addr)| addr));

    let engine = state.engine.clone();
    let (entry, reader, length) = spawn_blocking(move || {
        let mut entry = engine.request(&call_reference)?;
        let mut reader = entry.take_reader()?;
        reader.open()?;
        let length = reader.len()?;
        Ok::<_, StorageError>((entry, reader, length))
    })
    .await??;

    debug!(
        client = %client,
        call_reference = ?entry.call_reference,
        bytes = length,
        "serving entry"
    );

    let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
    spawn_blocking(move || stream_reader(reader, tx));
    let stream = futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx));

    let inline = state.is_whitelisted(&entry.content_type);
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type_value(&entry.content_type))
        .header(CONTENT_LENGTH, length)
        .header(CONTENT_DISPOSITION, disposition(inline, &entry.filename))
        .body(Body::from_stream(stream))
        .map_err(|e| ServerError::Internal(e.to_string()))
}

/// Pump the reader into the response channel until the end or until the
/// client goes away.
fn stream_reader(mut reader: Box<dyn LazyReader>, tx: mpsc::Sender<io::Result<Bytes>>) {
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                    debug!("client went away during download");
                    break;
                }
            }
            Err(err) => {
                warn!(error = %err, "reading entry failed mid-download");
                let _ = tx.blocking_send(Err(io::Error::new(io::ErrorKind::Other, err.to_string())));
                break;
            }
        }
    }
    if let Err(err) = reader.close() {
        debug!(error = %err, "closing entry reader failed");
    }
}

fn content_type_value(content_type: &str) -> HeaderValue {
    HeaderValue::from_str(content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(FALLBACK_CONTENT_TYPE))
}

fn disposition(inline: bool, filename: &str) -> HeaderValue {
    let kind = if inline { "inline" } else { "attachment" };
    let filename: String = filename
        .chars()
        .filter(|c| *c != '"' && *c != '\\' && !c.is_control())
        .collect();
    // Header values outside ASCII are passed through as raw bytes.
    if filename.is_empty() || !filename.is_ascii() {
        return HeaderValue::from_static(kind);
    }
    HeaderValue::from_str(&format!("{kind}; filename=\"{filename}\""))
        .unwrap_or_else(|_| HeaderValue::from_static(kind))
}
