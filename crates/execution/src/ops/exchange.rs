//! Send and receive operators, the task-side ends of an exchange.

use std::collections::VecDeque;

use arrow_schema::SchemaRef;
use bytes::Bytes;
use futures::{stream, StreamExt};
use shardex_codec::{decode_tuples, encode_tuples, Tuple};
use shardex_common::{Result, ShardexError};
use shardex_exchange::{ReceiveEndpoint, SendEndpoint};
use tracing::{debug, warn};

use crate::context::SharedTaskContext;
use crate::operator::{ReceiveExec, SendExec};
use crate::stream::{tuple_stream, SendableTupleStream};

enum ReceiveState {
    Init(ReceiveExec, SharedTaskContext),
    Open(ReceiveEndpoint, VecDeque<Tuple>),
    Done,
}

/// Emit the tuples shipped to this operator's tag. The endpoint is
/// registered on first poll.
pub(super) fn receive(exec: &ReceiveExec, schema: SchemaRef, ctx: &SharedTaskContext) -> SendableTupleStream {
    let init = ReceiveState::Init(exec.clone(), ctx.clone());
    let out = stream::try_unfold(init, |mut state| async move {
        loop {
            state = match state {
                ReceiveState::Done => return Ok::<_, ShardexError>(None),
                ReceiveState::Init(exec, ctx) => {
                    let node = &ctx.node;
                    let endpoint = ReceiveEndpoint::init(
                        exec.tag,
                        exec.source.clone(),
                        node.endpoints.clone(),
                        node.channels.as_ref(),
                        node.config.exchange_queue_capacity,
                        node.config.connect_timeout(),
                        ctx.cancel.clone(),
                    )
                    .await?;
                    ReceiveState::Open(endpoint, VecDeque::new())
                }
                ReceiveState::Open(mut endpoint, mut buffered) => {
                    if let Some(tuple) = buffered.pop_front() {
                        return Ok(Some((tuple, ReceiveState::Open(endpoint, buffered))));
                    }
                    match endpoint.next().await? {
                        Some(payload) => {
                            buffered.extend(decode_tuples(&payload)?);
                            ReceiveState::Open(endpoint, buffered)
                        }
                        None => {
                            debug!(tag = %endpoint.tag(), "receive drained");
                            ReceiveState::Done
                        }
                    }
                }
            };
        }
    });
    tuple_stream(schema, out)
}

/// Ship the whole input to the receiver, in batches of
/// `batch_size_rows`. Returns the number of tuples sent.
pub(super) async fn run_send(exec: &SendExec, mut input: SendableTupleStream, ctx: &SharedTaskContext) -> Result<u64> {
    let node = &ctx.node;
    let schema = input.schema();
    let mut endpoint = SendEndpoint::init(
        exec.tag,
        exec.target.clone(),
        node.endpoints.clone(),
        node.channels.as_ref(),
        node.config.connect_timeout(),
        ctx.cancel.clone(),
    )
    .await?;

    let batch_size = node.config.batch_size_rows.max(1);
    let shipped = async {
        let mut batch = Vec::with_capacity(batch_size);
        let mut sent = 0u64;
        while let Some(tuple) = input.next().await {
            batch.push(tuple?);
            if batch.len() >= batch_size {
                sent += ship(&mut endpoint, &schema, &mut batch).await?;
            }
        }
        if !batch.is_empty() {
            sent += ship(&mut endpoint, &schema, &mut batch).await?;
        }
        endpoint.finish().await?;
        Ok::<u64, ShardexError>(sent)
    }
    .await;

    match shipped {
        Ok(sent) => {
            debug!(tag = %exec.tag, target = %exec.target, tuples = sent, "send finished");
            endpoint.close().await?;
            Ok(sent)
        }
        Err(e) => {
            if !e.is_cancellation() {
                endpoint.abort(&e.to_string()).await;
            }
            if let Err(close_err) = endpoint.close().await {
                warn!(tag = %exec.tag, error = %close_err, "closing failed send endpoint");
            }
            Err(e)
        }
    }
}

async fn ship(endpoint: &mut SendEndpoint, schema: &SchemaRef, batch: &mut Vec<Tuple>) -> Result<u64> {
    let payload = encode_tuples(schema, batch)?;
    let n = batch.len() as u64;
    batch.clear();
    endpoint.send(Bytes::from(payload)).await?;
    Ok(n)
}
