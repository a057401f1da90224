//! Runs several transports under one cancellation token.
//!
//! The first transport to fail cancels the token, which drains every sibling;
//! [`Orchestrator::wait`] then reports that first failure. Cancelling the
//! token from outside (a signal handler, a test) goes through the same path
//! and ends in `Ok(())`.

use std::time::Duration;

use axum::Router;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use trirpc_common::config::{DEFAULT_DRAIN_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT};

use crate::{
    error::{OrchestrationError, ServeError},
    listener::{Listener, TransportEndpoint},
};

pub struct Orchestrator {
    router:            Router,
    shutdown:          CancellationToken,
    drain_timeout:     Duration,
    handshake_timeout: Duration,
    transports:        JoinSet<Result<(), ServeError>>,
}

impl Orchestrator {
    pub fn new(router: Router, shutdown: CancellationToken) -> Self {
        Self {
            router,
            shutdown,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            transports: JoinSet::new(),
        }
    }

    /// Applies to listeners bound by [`spawn`](Self::spawn) afterwards.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Binds and serves `endpoint` in its own task. A bind failure is reported
    /// from [`wait`](Self::wait) like any other transport failure.
    pub fn spawn(&mut self, endpoint: TransportEndpoint) {
        let router = self.router.clone();
        let shutdown = self.shutdown.clone();
        let drain_timeout = self.drain_timeout;
        let handshake_timeout = self.handshake_timeout;

        self.transports.spawn(async move {
            let listener = Listener::bind(endpoint)
                .await?
                .with_drain_timeout(drain_timeout)
                .with_handshake_timeout(handshake_timeout);
            listener.serve(router, shutdown).await
        });
    }

    /// Serves an already bound listener, keeping its own timeouts.
    pub fn spawn_listener(&mut self, listener: Listener) {
        let router = self.router.clone();
        let shutdown = self.shutdown.clone();
        self.transports
            .spawn(async move { listener.serve(router, shutdown).await });
    }

    /// Waits for every transport to close. Returns the first error, after
    /// all siblings have drained.
    pub async fn wait(mut self) -> Result<(), OrchestrationError> {
        let mut first_error = None;

        while let Some(joined) = self.transports.join_next().await {
            let error = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => OrchestrationError::Transport(e),
                Err(e) => OrchestrationError::Task(e.to_string()),
            };

            if first_error.is_none() {
                tracing::error!("Transport failed, shutting down: {}", error);
                self.shutdown.cancel();
                first_error = Some(error);
            } else {
                tracing::warn!("Additional transport failure: {}", error);
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
