//! gRPC log service.
//!
//! A stateless dispatcher over the commit log: every handler authorizes the
//! caller, delegates to [`strata_log::Log`], and maps domain errors to
//! statuses. The one piece of real control flow lives in `ConsumeStream`,
//! which treats offset-out-of-range as "caught up with the log, retry"
//! rather than a failure, giving consumers a tail-follow that resumes as
//! records arrive.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, error};

use strata_api::log_v1::log_server::Log as LogRpc;
use strata_api::log_v1::{
    ConsumeRequest, ConsumeResponse, ProduceBulkResponse, ProduceRequest, ProduceResponse, Record,
};
use strata_api::offset_out_of_range_status;
use strata_log::{Log, LogError};

use crate::auth::{Authorizer, Subject};

/// The single object clients act on; the log has no finer-grained resources.
const OBJECT_WILDCARD: &str = "*";
/// Action required to append records.
const PRODUCE_ACTION: &str = "produce";
/// Action required to read records.
const CONSUME_ACTION: &str = "consume";

/// How long a tailing consumer sleeps before re-checking the end of the log.
const TAIL_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Buffered responses on streaming RPCs.
const STREAM_CHANNEL_CAPACITY: usize = 64;

/// The log service served over gRPC.
#[derive(Debug)]
pub struct LogService {
    log: Arc<Log>,
    authorizer: Arc<Authorizer>,
}

impl LogService {
    /// Creates a service over the given log and authorizer.
    #[must_use]
    pub fn new(log: Arc<Log>, authorizer: Arc<Authorizer>) -> Self {
        Self { log, authorizer }
    }

    /// Checks the caller's subject (resolved by the authentication
    /// interceptor) against the policy for `action`.
    fn authorize<T>(&self, request: &Request<T>, action: &str) -> Result<(), Status> {
        let subject = request
            .extensions()
            .get::<Subject>()
            .map(|s| s.0.as_str())
            .unwrap_or_default();
        self.authorizer.authorize(subject, OBJECT_WILDCARD, action)
    }
}

/// Appends one record, producing the response for a produce-shaped request.
fn append_record(log: &Log, record: Option<Record>) -> Result<ProduceResponse, Status> {
    let mut record =
        record.ok_or_else(|| Status::invalid_argument("produce request is missing a record"))?;
    let offset = log.append(&mut record).map_err(into_status)?;
    Ok(ProduceResponse { offset })
}

/// Maps a log error to the status sent to clients. Out-of-range travels as a
/// typed NOT_FOUND payload; everything else is internal and logged here, the
/// point where it surfaces.
fn into_status(err: LogError) -> Status {
    match err {
        LogError::OffsetOutOfRange { offset } => offset_out_of_range_status(offset),
        other => {
            error!(error = %other, "log operation failed");
            Status::internal(other.to_string())
        }
    }
}

#[tonic::async_trait]
impl LogRpc for LogService {
    async fn produce(
        &self,
        request: Request<ProduceRequest>,
    ) -> Result<Response<ProduceResponse>, Status> {
        self.authorize(&request, PRODUCE_ACTION)?;
        let response = append_record(&self.log, request.into_inner().record)?;
        debug!(offset = response.offset, "produced record");
        Ok(Response::new(response))
    }

    async fn consume(
        &self,
        request: Request<ConsumeRequest>,
    ) -> Result<Response<ConsumeResponse>, Status> {
        self.authorize(&request, CONSUME_ACTION)?;
        let offset = request.into_inner().offset;
        debug!(offset, "consume request");
        let record = self.log.read(offset).map_err(into_status)?;
        Ok(Response::new(ConsumeResponse {
            record: Some(record),
        }))
    }

    type ProduceStreamStream = ReceiverStream<Result<ProduceResponse, Status>>;

    async fn produce_stream(
        &self,
        request: Request<Streaming<ProduceRequest>>,
    ) -> Result<Response<Self::ProduceStreamStream>, Status> {
        self.authorize(&request, PRODUCE_ACTION)?;
        let mut requests = request.into_inner();
        let log = Arc::clone(&self.log);
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            loop {
                match requests.message().await {
                    Ok(Some(req)) => {
                        let response = append_record(&log, req.record);
                        let failed = response.is_err();
                        if tx.send(response).await.is_err() || failed {
                            return;
                        }
                    }
                    // Client half-closed: the stream is complete.
                    Ok(None) => return,
                    Err(status) => {
                        let _ = tx.send(Err(status)).await;
                        return;
                    }
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    type ConsumeStreamStream = ReceiverStream<Result<ConsumeResponse, Status>>;

    async fn consume_stream(
        &self,
        request: Request<ConsumeRequest>,
    ) -> Result<Response<Self::ConsumeStreamStream>, Status> {
        self.authorize(&request, CONSUME_ACTION)?;
        let mut offset = request.into_inner().offset;
        debug!(offset, "consume stream starting");
        let log = Arc::clone(&self.log);
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            loop {
                match log.read(offset) {
                    Ok(record) => {
                        let response = ConsumeResponse {
                            record: Some(record),
                        };
                        if tx.send(Ok(response)).await.is_err() {
                            // Consumer went away; terminate cleanly.
                            return;
                        }
                        offset += 1;
                    }
                    // Caught up with the log: hold position and retry until
                    // a producer moves the end past us.
                    Err(LogError::OffsetOutOfRange { .. }) => {
                        tokio::time::sleep(TAIL_RETRY_INTERVAL).await;
                        if tx.is_closed() {
                            return;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(into_status(err))).await;
                        return;
                    }
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn produce_bulk_records(
        &self,
        request: Request<Streaming<ProduceRequest>>,
    ) -> Result<Response<ProduceBulkResponse>, Status> {
        self.authorize(&request, PRODUCE_ACTION)?;
        let mut requests = request.into_inner();
        let mut records_inserted = 0u64;
        while let Some(req) = requests.message().await? {
            append_record(&self.log, req.record)?;
            records_inserted += 1;
        }
        debug!(records_inserted, "bulk produce complete");
        Ok(Response::new(ProduceBulkResponse { records_inserted }))
    }
}
