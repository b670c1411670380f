//! Resource ledger
//!
//! Owns every live handle opened for the current session (capture streams,
//! the composite stream, loop cancellation tokens) and releases all of them
//! on stop, discard, acquisition failure and teardown.
//!
//! Each `release_all` starts a new epoch. Acquisitions record the epoch they
//! started in; a handle that resolves after its epoch has been released is
//! stopped on arrival instead of being tracked.

use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::capture::traits::{StreamHandle, StreamReader};
use crate::utils::error::{AppError, AppResult};

/// Acquisition generation a registration belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEpoch(u64);

enum TrackedResource {
    Stream(StreamHandle),
    Task {
        name: &'static str,
        token: CancellationToken,
    },
}

struct LedgerEntry {
    id: Uuid,
    resource: TrackedResource,
}

impl LedgerEntry {
    fn label(&self) -> String {
        match &self.resource {
            TrackedResource::Stream(handle) => {
                format!("{} stream {}", handle.descriptor().kind, self.id)
            }
            TrackedResource::Task { name, .. } => format!("{} task {}", name, self.id),
        }
    }

    fn release(self) -> AppResult<()> {
        match self.resource {
            TrackedResource::Stream(handle) => handle.release(),
            TrackedResource::Task { token, .. } => {
                token.cancel();
                Ok(())
            }
        }
    }
}

/// A resource that failed to release cleanly
#[derive(Debug, Clone)]
pub struct ReleaseFailure {
    pub resource: String,
    pub message: String,
}

/// Outcome of a `release_all` pass
#[derive(Debug, Clone, Default)]
pub struct ReleaseReport {
    pub released: usize,
    pub failures: Vec<ReleaseFailure>,
}

impl ReleaseReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct LedgerInner {
    epoch: u64,
    entries: Vec<LedgerEntry>,
}

/// Tracks live handles for one recording session
pub struct ResourceLedger {
    inner: Mutex<LedgerInner>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LedgerInner {
                epoch: 0,
                entries: Vec::new(),
            }),
        }
    }

    pub fn epoch(&self) -> LedgerEpoch {
        LedgerEpoch(self.inner.lock().epoch)
    }

    /// Take ownership of a stream handle and return read access to it
    pub fn track_stream(&self, handle: StreamHandle, epoch: LedgerEpoch) -> AppResult<StreamReader> {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch.0 {
            drop(inner);
            let id = handle.id();
            tracing::warn!("Stream {} resolved after its session was released; stopping", id);
            if let Err(e) = handle.release() {
                tracing::warn!("Failed to stop late stream {}: {}", id, e);
            }
            return Err(AppError::PreconditionViolation(
                "acquisition was cancelled before the source resolved".to_string(),
            ));
        }

        let reader = handle.reader();
        let id = handle.id();
        tracing::debug!("Tracking stream {} ({})", id, handle.descriptor().kind);
        inner.entries.push(LedgerEntry {
            id,
            resource: TrackedResource::Stream(handle),
        });
        Ok(reader)
    }

    /// Track a background loop by its cancellation token
    pub fn track_task(
        &self,
        name: &'static str,
        token: CancellationToken,
        epoch: LedgerEpoch,
    ) -> AppResult<Uuid> {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch.0 {
            token.cancel();
            return Err(AppError::PreconditionViolation(format!(
                "{} started after its session was released",
                name
            )));
        }

        let id = Uuid::new_v4();
        tracing::debug!("Tracking {} task {}", name, id);
        inner.entries.push(LedgerEntry {
            id,
            resource: TrackedResource::Task { name, token },
        });
        Ok(id)
    }

    /// Number of resources tracked and not yet released
    pub fn live_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Release everything tracked so far.
    ///
    /// Runs to completion even when individual releases fail or panic; the
    /// failures are collected in the report. Calling it again with nothing
    /// tracked is a no-op.
    pub fn release_all(&self) -> ReleaseReport {
        let entries = {
            let mut inner = self.inner.lock();
            inner.epoch += 1;
            std::mem::take(&mut inner.entries)
        };

        let mut report = ReleaseReport::default();
        for entry in entries.into_iter().rev() {
            let label = entry.label();
            match panic::catch_unwind(AssertUnwindSafe(|| entry.release())) {
                Ok(Ok(())) => report.released += 1,
                Ok(Err(e)) => {
                    tracing::warn!("Failed to release {}: {}", label, e);
                    report.failures.push(ReleaseFailure {
                        resource: label,
                        message: e.to_string(),
                    });
                }
                Err(_) => {
                    tracing::error!("Releasing {} panicked", label);
                    report.failures.push(ReleaseFailure {
                        resource: label,
                        message: "release panicked".to_string(),
                    });
                }
            }
        }

        if report.released > 0 || !report.failures.is_empty() {
            tracing::info!(
                "Released {} resources ({} failures)",
                report.released + report.failures.len(),
                report.failures.len()
            );
        }
        report
    }
}

impl Default for ResourceLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ResourceLedger {
    fn drop(&mut self) {
        if !self.inner.get_mut().entries.is_empty() {
            self.release_all();
        }
    }
}
