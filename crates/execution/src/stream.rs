//! Tuple stream abstractions.

use std::pin::Pin;
use std::task::{Context, Poll};

use arrow_schema::SchemaRef;
use futures::Stream;
use shardex_codec::Tuple;
use shardex_common::Result;

/// A stream of tuples that also knows its output schema.
pub trait TupleStream: Stream<Item = Result<Tuple>> + Send {
    fn schema(&self) -> SchemaRef;
}

/// The stream every operator returns.
pub type SendableTupleStream = Pin<Box<dyn TupleStream>>;

/// Attaches a schema to any `Stream<Item = Result<Tuple>>`.
pub struct StreamAdapter<S> {
    schema: SchemaRef,
    inner: S,
}

impl<S> StreamAdapter<S> {
    pub fn new(schema: SchemaRef, inner: S) -> Self {
        Self { schema, inner }
    }
}

impl<S> TupleStream for StreamAdapter<S>
where
    S: Stream<Item = Result<Tuple>> + Send + Unpin,
{
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl<S> Stream for StreamAdapter<S>
where
    S: Stream<Item = Result<Tuple>> + Unpin,
{
    type Item = Result<Tuple>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Box any tuple stream as an operator output.
pub fn tuple_stream<S>(schema: SchemaRef, inner: S) -> SendableTupleStream
where
    S: Stream<Item = Result<Tuple>> + Send + 'static,
{
    Box::pin(StreamAdapter::new(schema, Box::pin(inner)))
}

pub fn empty_stream(schema: SchemaRef) -> SendableTupleStream {
    tuple_stream(schema, futures::stream::empty::<Result<Tuple>>())
}
