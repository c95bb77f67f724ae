//! JSONL audit sink for `ticketgate`. Writes one admission event per line.
//! Always appends; bring your own path.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use ticketgate::telemetry::{AdmissionEvent, NonBlockingSink, TelemetrySink};

#[derive(Clone, Debug)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Append from a background task so emitters never wait on the file.
    ///
    /// At most `capacity` events wait in the queue; later ones are dropped
    /// and counted. Must be called inside a tokio runtime.
    pub fn non_blocking(self, capacity: usize) -> NonBlockingSink<Self> {
        NonBlockingSink::with_capacity(self, capacity)
    }
}

impl tower_service::Service<AdmissionEvent> for JsonlSink {
    type Response = ();
    type Error = io::Error;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: AdmissionEvent) -> Self::Future {
        let path = self.path.clone();
        let line = serde_json::to_string(&event).map(|json| json + "\n");
        Box::pin(async move {
            use tokio::io::AsyncWriteExt;
            let line = line.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let mut file =
                tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
            tracing::trace!(target: "ticketgate::jsonl", path = %path.display(), "event appended");
            Ok(())
        })
    }
}

impl TelemetrySink for JsonlSink {
    type SinkError = io::Error;
}
