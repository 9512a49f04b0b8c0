use super::{ResponseSender, inbound_error};
use futures::{Stream, StreamExt};
use logstream_core::{Error, Result};
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Drives a duplex call in strict request/response lock-step.
///
/// Each iteration reads one request, runs `handle` on it and writes exactly
/// one response before the next request is read, so response `i` always
/// answers request `i`. Every wait races `cancel`.
///
/// Returns the number of responses written once the peer closes its send
/// side.
///
/// # Errors
///
/// - Any error from `handle` ends the call with that error; later requests
///   are never read.
/// - [`Error::Transport`] if the inbound stream yields an error.
/// - [`Error::ChannelError`] if the response cannot be written.
/// - [`Error::RequestCancelled`] if `cancel` fires or the peer cancels.
pub async fn run_lockstep<Req, Resp, S, H, Fut>(
    mut inbound: S,
    resp_tx: ResponseSender<Resp>,
    cancel: CancellationToken,
    mut handle: H,
) -> Result<usize>
where
    S: Stream<Item = core::result::Result<Req, Status>> + Unpin + Send,
    H: FnMut(Req) -> Fut + Send,
    Fut: Future<Output = Result<Resp>> + Send,
    Resp: Send,
{
    let mut written = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::RequestCancelled);
        }

        let req = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::RequestCancelled),
            next = inbound.next() => match next {
                None => return Ok(written),
                Some(Ok(req)) => req,
                Some(Err(status)) => return Err(inbound_error(&status)),
            },
        };

        let resp = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::RequestCancelled),
            resp = handle(req) => resp?,
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::RequestCancelled),
            sent = resp_tx.send(Ok(resp)) => sent.map_err(|e| Error::ChannelError {
                context: format!("Failed to send response: {e}"),
            })?,
        }

        written += 1;
    }
}
