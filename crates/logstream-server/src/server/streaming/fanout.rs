use super::ResponseSender;
use logstream_core::{Error, Result};
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;

/// Capacity of the channel between the producer and consumer tasks. One slot
/// bounds memory to a single record in flight between them.
pub const HANDOFF_CAPACITY: usize = 1;

#[derive(Clone, Copy, Debug)]
enum Task {
    Producer,
    Consumer,
}

/// Streams `records` to the peer through a producer task and a consumer task.
///
/// The producer pushes records into a one-slot handoff channel in their
/// original order and closes it after the last one. The consumer drains the
/// channel and writes one response per record, stopping at the first write
/// failure. Both tasks race `cancel` at every wait and are always joined
/// before this returns; dropping the returned future aborts them.
///
/// Returns the number of responses written.
///
/// # Errors
///
/// The first failure from either task; the other task is then cancelled. A
/// consumer failure takes precedence, since a failed write also fails the
/// producer's handoff.
/// - [`Error::ChannelError`] if a response cannot be written.
/// - [`Error::RequestCancelled`] if `cancel` fires.
/// - [`Error::Internal`] if a task panics.
pub async fn fan_out<T, R, F>(
    records: Vec<T>,
    resp_tx: ResponseSender<R>,
    cancel: CancellationToken,
    to_response: F,
) -> Result<usize>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
{
    // Cancelled on the first task failure without touching the caller's token.
    let token = cancel.child_token();
    let (handoff_tx, mut handoff_rx) = mpsc::channel::<T>(HANDOFF_CAPACITY);
    let mut tasks: JoinSet<(Task, Result<usize>)> = JoinSet::new();

    let producer_token = token.clone();
    tasks.spawn(async move {
        let run = async {
            let mut produced = 0;
            for record in records {
                tokio::select! {
                    biased;
                    () = producer_token.cancelled() => return Err(Error::RequestCancelled),
                    sent = handoff_tx.send(record) => sent.map_err(|_| Error::ChannelError {
                        context: "Handoff receiver dropped".to_string(),
                    })?,
                }
                produced += 1;
            }
            Ok::<_, Error>(produced)
        };
        (Task::Producer, run.await)
    });

    let consumer_token = token.clone();
    tasks.spawn(async move {
        let run = async {
            let mut consumed = 0;
            loop {
                let record = tokio::select! {
                    biased;
                    () = consumer_token.cancelled() => return Err(Error::RequestCancelled),
                    next = handoff_rx.recv() => match next {
                        Some(record) => record,
                        None => break,
                    },
                };

                let response = to_response(record);
                tokio::select! {
                    biased;
                    () = consumer_token.cancelled() => return Err(Error::RequestCancelled),
                    sent = resp_tx.send(Ok(response)) => sent.map_err(|e| Error::ChannelError {
                        context: format!("Failed to forward record: {e}"),
                    })?,
                }
                consumed += 1;
            }
            Ok::<_, Error>(consumed)
        };
        (Task::Consumer, run.await)
    });

    let mut producer_err = None;
    let mut consumer_err = None;
    let mut written = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((Task::Consumer, Ok(n))) => written = n,
            Ok((Task::Producer, Ok(n))) => tracing::trace!(produced = n, "Producer finished"),
            Ok((Task::Consumer, Err(e))) => {
                token.cancel();
                consumer_err.get_or_insert(e);
            }
            Ok((Task::Producer, Err(e))) => {
                token.cancel();
                producer_err.get_or_insert(e);
            }
            Err(e) => {
                token.cancel();
                producer_err.get_or_insert(Error::internal("stream task failed", e));
            }
        }
    }

    match consumer_err.or(producer_err) {
        Some(e) => Err(e),
        None => Ok(written),
    }
}
