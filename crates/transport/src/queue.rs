//! Single FIFO worker for HTTP-borne calls and edits.
//!
//! Every job waits for the previous one to finish, so a field edit can never
//! race a call that depends on it.

use crate::backend::HttpBackend;
use crate::error::{Result, TransportError};
use jrx_protocol::{CallRequest, CallResult, OutboundSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

enum Job {
    Call {
        qualified: String,
        request: CallRequest,
        reply: oneshot::Sender<CallResult>,
    },
    Set {
        route: String,
        edit: OutboundSet,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Handle to the queue worker. Cloning shares the same queue.
#[derive(Clone)]
pub struct RequestQueue {
    jobs: mpsc::UnboundedSender<Job>,
}

impl RequestQueue {
    /// Spawn the worker on the current tokio runtime. It stops when every
    /// handle is dropped.
    pub fn spawn(backend: Arc<dyn HttpBackend>) -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    Job::Call {
                        qualified,
                        request,
                        reply,
                    } => {
                        let result = backend.call(&qualified, &request).await;
                        let _ = reply.send(result);
                    }
                    Job::Set { route, edit, reply } => {
                        let result = backend.set(&route, &edit).await;
                        if let Err(e) = &result {
                            log::warn!("Edit of {} failed: {e}", edit.k);
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            log::debug!("Request queue drained and closed");
        });
        Self { jobs }
    }

    /// Enqueue a call; the receiver resolves once it ran.
    pub fn submit_call(
        &self,
        qualified: impl Into<String>,
        request: CallRequest,
    ) -> oneshot::Receiver<CallResult> {
        let (reply, rx) = oneshot::channel();
        let job = Job::Call {
            qualified: qualified.into(),
            request,
            reply,
        };
        if self.jobs.send(job).is_err() {
            log::warn!("Request queue is closed, dropping call");
        }
        rx
    }

    /// Enqueue a direct value set.
    pub fn submit_set(
        &self,
        route: impl Into<String>,
        edit: OutboundSet,
    ) -> oneshot::Receiver<Result<()>> {
        let (reply, rx) = oneshot::channel();
        let job = Job::Set {
            route: route.into(),
            edit,
            reply,
        };
        if self.jobs.send(job).is_err() {
            log::warn!("Request queue is closed, dropping edit");
        }
        rx
    }

    pub async fn call(&self, qualified: impl Into<String>, request: CallRequest) -> CallResult {
        self.submit_call(qualified, request)
            .await
            .unwrap_or_else(|_| CallResult::network_failure("request queue closed"))
    }

    pub async fn set(&self, route: impl Into<String>, edit: OutboundSet) -> Result<()> {
        self.submit_set(route, edit)
            .await
            .map_err(|_| TransportError::QueueClosed)?
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("closed", &self.jobs.is_closed())
            .finish()
    }
}
