//! Per-call drivers for streaming RPCs.
//!
//! A streaming handler validates what it can up front, then hands the rest
//! of the call to a driver running on its own task via [`spawn_stream`]. The
//! driver writes responses into a bounded channel whose receiving end is the
//! gRPC response stream.
//!
//! ## Structure
//!
//! - [`lockstep`] - duplex calls: one response per request, strictly in order.
//! - [`fanout`] - server-streaming calls: a producer and a consumer task
//!   joined by a one-slot handoff channel.

pub mod fanout;
pub mod lockstep;

use crate::server::{
    service::lifecycle::CallGuard,
    telemetry::{
        decrement_streams_inflight, increment_errors, increment_streams_inflight,
        record_stream_duration,
    },
};
use core::pin::Pin;
use logstream_core::{Error, Result};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::Instrument;

/// Outbound half of a streaming call.
pub type ResponseSender<T> = mpsc::Sender<core::result::Result<T, Status>>;

/// Response stream type returned by streaming handlers.
pub type ResponseStream<T> = Pin<Box<dyn Stream<Item = core::result::Result<T, Status>> + Send>>;

/// Runs `driver` on its own task for the lifetime of one streaming call.
///
/// The driver resolves to the number of responses it wrote. If it fails, the
/// error is sent to the peer as the final item of the stream on a best-effort
/// basis. If the peer drops the response stream first, the call's token is
/// cancelled and the driver is dropped.
///
/// `guard` is held until the driver finishes and the final status is either
/// delivered or dropped. A cancelled call never waits on a full response
/// channel.
pub fn spawn_stream<T, F>(
    name: &'static str,
    guard: CallGuard,
    resp_tx: ResponseSender<T>,
    driver: F,
) where
    T: Send + 'static,
    F: Future<Output = Result<usize>> + Send + 'static,
{
    let start = std::time::Instant::now();
    increment_streams_inflight();

    let fut = async move {
        let outcome = tokio::select! {
            biased;
            outcome = driver => outcome,
            () = resp_tx.closed() => {
                guard.token().cancel();
                Err(Error::RequestCancelled)
            }
        };

        match outcome {
            Ok(written) => tracing::debug!(written, "Stream completed"),
            Err(e) => {
                increment_errors();
                match &e {
                    Error::RequestCancelled | Error::ChannelError { .. } => {
                        tracing::debug!(error = %e, "Stream ended early");
                    }
                    _ => tracing::warn!(error = %e, "Stream failed"),
                }
                forward_final_status(&resp_tx, e.into(), guard.token()).await;
            }
        }

        decrement_streams_inflight();
        record_stream_duration(start.elapsed().as_millis() as f64);
        drop(guard);
    };

    tokio::spawn(fut.instrument(tracing::info_span!("stream", rpc = name)));
}

/// Sends `status` as the last item of the stream.
///
/// A full channel is waited on only until `cancel` fires; after that the
/// status is dropped.
async fn forward_final_status<T>(
    resp_tx: &ResponseSender<T>,
    status: Status,
    cancel: &CancellationToken,
) {
    let status = match resp_tx.try_send(Err(status)) {
        Ok(()) => return,
        Err(TrySendError::Closed(_)) => {
            tracing::debug!("Failed to forward error: peer disconnected");
            return;
        }
        Err(TrySendError::Full(status)) => status,
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            tracing::debug!("Dropped final status: call cancelled with a full response channel");
        }
        sent = resp_tx.send(status) => {
            if sent.is_err() {
                tracing::debug!("Failed to forward error: peer disconnected");
            }
        }
    }
}

/// Classifies a failed inbound read.
pub(crate) fn inbound_error(status: &Status) -> Error {
    if status.code() == tonic::Code::Cancelled {
        Error::RequestCancelled
    } else {
        Error::Transport {
            context: format!("{:?}: {}", status.code(), status.message()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::service::lifecycle::Lifecycle;
    use core::time::Duration;
    use std::sync::Arc;

    #[test]
    fn inbound_cancel_is_request_cancelled() {
        assert!(matches!(
            inbound_error(&Status::cancelled("gone")),
            Error::RequestCancelled
        ));
        assert!(matches!(
            inbound_error(&Status::unknown("h2 reset")),
            Error::Transport { .. }
        ));
    }

    #[tokio::test]
    async fn driver_error_becomes_final_status() {
        let lifecycle = Arc::new(Lifecycle::new());
        let guard = lifecycle.begin().unwrap();
        let (resp_tx, mut resp_rx) = mpsc::channel::<core::result::Result<u32, Status>>(1);

        let tx = resp_tx.clone();
        spawn_stream("test", guard, resp_tx, async move {
            tx.send(Ok(1)).await.unwrap();
            Err(Error::not_found("log 9"))
        });

        assert_eq!(resp_rx.recv().await.unwrap().unwrap(), 1);
        let status = resp_rx.recv().await.unwrap().unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
        assert!(resp_rx.recv().await.is_none());
        assert_eq!(lifecycle.inflight(), 0);
    }

    #[tokio::test]
    async fn dropped_response_stream_cancels_call() {
        let lifecycle = Arc::new(Lifecycle::new());
        let guard = lifecycle.begin().unwrap();
        let token = guard.token().clone();
        let (resp_tx, resp_rx) = mpsc::channel::<core::result::Result<u32, Status>>(1);

        spawn_stream("test", guard, resp_tx, futures::future::pending());
        drop(resp_rx);

        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_call_with_full_channel_releases_its_guard() {
        let lifecycle = Arc::new(Lifecycle::new());
        let guard = lifecycle.begin().unwrap();
        let token = guard.token().clone();
        // Held but never read.
        let (resp_tx, _resp_rx) = mpsc::channel::<core::result::Result<u32, Status>>(1);

        let tx = resp_tx.clone();
        spawn_stream("test", guard, resp_tx, async move {
            tx.send(Ok(1)).await.unwrap();
            token.cancelled().await;
            Err(Error::RequestCancelled)
        });

        lifecycle.shutdown(Duration::from_millis(20)).await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while lifecycle.inflight() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn final_status_waits_for_room_while_the_call_is_live() {
        let lifecycle = Arc::new(Lifecycle::new());
        let guard = lifecycle.begin().unwrap();
        let (resp_tx, mut resp_rx) = mpsc::channel::<core::result::Result<u32, Status>>(1);

        let tx = resp_tx.clone();
        spawn_stream("test", guard, resp_tx, async move {
            tx.send(Ok(1)).await.unwrap();
            Err(Error::not_found("log 2"))
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(resp_rx.recv().await.unwrap().unwrap(), 1);
        let status = resp_rx.recv().await.unwrap().unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
        assert!(resp_rx.recv().await.is_none());
        assert_eq!(lifecycle.inflight(), 0);
    }
}
