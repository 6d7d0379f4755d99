//! Local Unix-socket listener for queueing scans by hand.
//!
//! Each connection sends one line holding an IP address and gets a one-line reply.
use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::service::ScanService;
use crate::types::normalize_address;

pub const REPLY_OK: &str = "Ok.\n";
pub const REPLY_INVALID: &str = "Invalid address.\n";
pub const REPLY_FULL: &str = "Queue full.\n";

/// Listen on `path` until `cancel` fires. A stale socket file is removed first.
pub async fn serve_qsock(
    path: impl AsRef<Path>,
    service: ScanService,
    cancel: CancellationToken,
) -> Result<()> {
    let path = path.as_ref();
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("unable to remove {}", path.display()))?;
    }
    let listener = UnixListener::bind(path)
        .with_context(|| format!("unable to listen on {}", path.display()))?;
    info!(path = %path.display(), "listening for local queue requests");

    loop {
        let (stream, _) = tokio::select! {
            _ = cancel.cancelled() => break,
            res = listener.accept() => res
                .with_context(|| format!("unable to accept clients on {}", path.display()))?,
        };
        let svc = service.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, &svc).await {
                debug!(error = %e, "<unix socket> unable to read local queue request");
            }
        });
    }

    let _ = std::fs::remove_file(path);
    Ok(())
}

/// Read one request line from `stream` and write the reply.
pub async fn handle_client<S>(stream: S, svc: &ScanService) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut line = String::new();
    BufReader::new(reader).read_line(&mut line).await?;
    writer.write_all(queue_line(svc, &line).as_bytes()).await?;
    writer.shutdown().await
}

/// Admit the address on `line`, returning the reply to send.
pub fn queue_line(svc: &ScanService, line: &str) -> &'static str {
    let Some(address) = normalize_address(&line.to_lowercase()) else {
        debug!(request = ?line.trim(), "<unix socket> invalid address");
        return REPLY_INVALID;
    };
    match svc.request(&address, true) {
        Ok(_) => {
            debug!(%address, "<unix socket> queued");
            REPLY_OK
        }
        Err(e) => {
            debug!(%address, error = %e, "<unix socket> not queued");
            REPLY_FULL
        }
    }
}
