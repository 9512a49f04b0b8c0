//! gRPC service implementation for storing and querying log records.
//!
//! [`LogService`] implements the generated [`LogsService`] trait. Unary RPCs
//! run inline on the request task. Streaming RPCs validate what they can up
//! front and then hand the call to a driver from
//! [`streaming`](crate::server::streaming) running on its own task.
//!
//! ## Responsibilities
//!
//! - Admit calls through [`Lifecycle`] and refuse them once shutdown starts.
//! - Validate every request before it reaches the repository.
//! - Map failures to gRPC statuses through `From<Error> for Status`.
//! - Record request, error and throughput metrics.

use crate::server::{
    config::ServerConfig,
    repo::LogRepository,
    service::{
        lifecycle::Lifecycle,
        validate::{parse_batch, parse_get, parse_query, parse_save, parse_stream_query},
    },
    streaming::{ResponseStream, fanout::fan_out, lockstep::run_lockstep, spawn_stream},
    telemetry::{
        increment_errors, increment_records_saved, increment_records_streamed, increment_requests,
    },
};
use futures::{Stream, TryStreamExt};
use logstream_core::{
    Error,
    proto::{
        ListLogRequest, ListLogResponse, ListLogsRequest, ListLogsResponse, ListLogsStreamRequest,
        ListLogsStreamResponse, Log, SaveLogRequest, SaveLogResponse, SaveLogsRequest,
        SaveLogsResponse, logs_service_server::LogsService,
    },
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

/// gRPC front end over a [`LogRepository`].
#[derive(Clone)]
pub struct LogService {
    repo: Arc<dyn LogRepository>,
    config: ServerConfig,
    lifecycle: Arc<Lifecycle>,
}

impl LogService {
    pub fn new(repo: Arc<dyn LogRepository>, config: ServerConfig) -> Self {
        Self {
            repo,
            config,
            lifecycle: Arc::new(Lifecycle::new()),
        }
    }

    /// Stops admitting calls, drains in-flight calls for up to the configured
    /// timeout and cancels the rest.
    pub async fn shutdown(&self) {
        self.lifecycle.shutdown(self.config.shutdown_timeout).await;
    }

    /// Runs a unary call under a [`CallGuard`](super::lifecycle::CallGuard).
    async fn unary<T, F>(&self, call: F) -> Result<Response<T>, Status>
    where
        F: Future<Output = logstream_core::Result<T>>,
    {
        increment_requests();
        let result = match self.lifecycle.begin() {
            Ok(guard) => {
                let result = call.await;
                drop(guard);
                result
            }
            Err(e) => Err(e),
        };

        result.map(Response::new).map_err(reject)
    }

    fn channel<T>(&self) -> (mpsc::Sender<Result<T, Status>>, mpsc::Receiver<Result<T, Status>>) {
        mpsc::channel(self.config.stream_buffer_size)
    }

    async fn save_one(&self, req: SaveLogRequest) -> logstream_core::Result<SaveLogResponse> {
        let log = parse_save(req)?;
        let id = self.repo.add_log(&log).await?;
        increment_records_saved(1);
        Ok(SaveLogResponse { id })
    }

    async fn save_batch(&self, req: SaveLogsRequest) -> logstream_core::Result<SaveLogsResponse> {
        let logs = parse_batch(req, self.config.max_batch_size)?;
        let ids = self.repo.add_logs(&logs).await?;
        increment_records_saved(ids.len() as u64);
        Ok(SaveLogsResponse { ids })
    }

    async fn get_one(&self, req: &ListLogRequest) -> logstream_core::Result<ListLogResponse> {
        let id = parse_get(req)?;
        let record = self.repo.get_log(id).await?;
        Ok(ListLogResponse {
            log: Some(record.into()),
        })
    }

    async fn query(&self, req: ListLogsRequest) -> logstream_core::Result<ListLogsResponse> {
        let filter = parse_query(req)?;
        let records = self.repo.get_logs(&filter).await?;
        if records.is_empty() {
            return Err(Error::not_found("logs"));
        }
        Ok(ListLogsResponse {
            logs: records.into_iter().map(Log::from).collect(),
        })
    }

    /// Duplex save over any inbound stream.
    fn spawn_save_stream<S>(
        &self,
        inbound: S,
    ) -> logstream_core::Result<ResponseStream<SaveLogResponse>>
    where
        S: Stream<Item = Result<SaveLogRequest, Status>> + Unpin + Send + 'static,
    {
        let guard = self.lifecycle.begin()?;
        let (resp_tx, resp_rx) = self.channel();
        let cancel = guard.token().clone();
        let service = self.clone();

        let driver = run_lockstep(inbound, resp_tx.clone(), cancel, move |req| {
            let service = service.clone();
            async move { service.save_one(req).await }
        });
        spawn_stream("save_log_stream", guard, resp_tx, driver);

        Ok(Box::pin(ReceiverStream::new(resp_rx)))
    }

    /// Duplex get-by-id over any inbound stream.
    fn spawn_get_stream<S>(
        &self,
        inbound: S,
    ) -> logstream_core::Result<ResponseStream<ListLogResponse>>
    where
        S: Stream<Item = Result<ListLogRequest, Status>> + Unpin + Send + 'static,
    {
        let guard = self.lifecycle.begin()?;
        let (resp_tx, resp_rx) = self.channel();
        let cancel = guard.token().clone();
        let service = self.clone();

        let driver = run_lockstep(inbound, resp_tx.clone(), cancel, move |req| {
            let service = service.clone();
            async move { service.get_one(&req).await }
        });
        spawn_stream("list_log_stream", guard, resp_tx, driver);

        Ok(Box::pin(ReceiverStream::new(resp_rx)))
    }

    fn spawn_query_stream(
        &self,
        req: ListLogsStreamRequest,
    ) -> logstream_core::Result<ResponseStream<ListLogsStreamResponse>> {
        let guard = self.lifecycle.begin()?;
        let filter = parse_stream_query(req)?;
        let (resp_tx, resp_rx) = self.channel();
        let cancel = guard.token().clone();
        let repo = Arc::clone(&self.repo);
        let tx = resp_tx.clone();

        let driver = async move {
            let records = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::RequestCancelled),
                records = repo.get_logs(&filter) => records?,
            };
            tracing::debug!(matched = records.len(), "Streaming query results");

            fan_out(records, tx, cancel, |record| ListLogsStreamResponse {
                log: Some(record.into()),
            })
            .await
        };
        spawn_stream("list_logs_stream", guard, resp_tx, driver);

        let stream = ReceiverStream::new(resp_rx).inspect_ok(|_| increment_records_streamed(1));
        Ok(Box::pin(stream))
    }
}

fn reject(err: Error) -> Status {
    increment_errors();
    match &err {
        Error::Internal { .. } | Error::TransactionRollback { .. } => {
            tracing::error!(error = %err, "Request failed");
        }
        _ => tracing::debug!(error = %err, "Request rejected"),
    }
    err.into()
}

#[tonic::async_trait]
impl LogsService for LogService {
    type SaveLogStreamStream = ResponseStream<SaveLogResponse>;
    type ListLogStreamStream = ResponseStream<ListLogResponse>;
    type ListLogsStreamStream = ResponseStream<ListLogsStreamResponse>;

    #[tracing::instrument(skip_all)]
    async fn save_log(
        &self,
        req: Request<SaveLogRequest>,
    ) -> Result<Response<SaveLogResponse>, Status> {
        self.unary(self.save_one(req.into_inner())).await
    }

    #[tracing::instrument(skip_all)]
    async fn save_log_stream(
        &self,
        req: Request<Streaming<SaveLogRequest>>,
    ) -> Result<Response<Self::SaveLogStreamStream>, Status> {
        increment_requests();
        self.spawn_save_stream(req.into_inner())
            .map(Response::new)
            .map_err(reject)
    }

    #[tracing::instrument(skip_all, fields(count = req.get_ref().logs.len()))]
    async fn save_logs(
        &self,
        req: Request<SaveLogsRequest>,
    ) -> Result<Response<SaveLogsResponse>, Status> {
        self.unary(self.save_batch(req.into_inner())).await
    }

    #[tracing::instrument(skip_all, fields(id = req.get_ref().id))]
    async fn list_log(
        &self,
        req: Request<ListLogRequest>,
    ) -> Result<Response<ListLogResponse>, Status> {
        let req = req.into_inner();
        self.unary(self.get_one(&req)).await
    }

    #[tracing::instrument(skip_all)]
    async fn list_log_stream(
        &self,
        req: Request<Streaming<ListLogRequest>>,
    ) -> Result<Response<Self::ListLogStreamStream>, Status> {
        increment_requests();
        self.spawn_get_stream(req.into_inner())
            .map(Response::new)
            .map_err(reject)
    }

    #[tracing::instrument(
        skip_all,
        fields(start = req.get_ref().start_time, end = req.get_ref().end_time)
    )]
    async fn list_logs(
        &self,
        req: Request<ListLogsRequest>,
    ) -> Result<Response<ListLogsResponse>, Status> {
        self.unary(self.query(req.into_inner())).await
    }

    #[tracing::instrument(
        skip_all,
        fields(start = req.get_ref().start_time, end = req.get_ref().end_time)
    )]
    async fn list_logs_stream(
        &self,
        req: Request<ListLogsStreamRequest>,
    ) -> Result<Response<Self::ListLogsStreamStream>, Status> {
        increment_requests();
        self.spawn_query_stream(req.into_inner())
            .map(Response::new)
            .map_err(reject)
    }
}
