//! Transaction-scoped result streams.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::codec::RowCodec;
use crate::driver::{RawRow, RowBatchSource};
use crate::error::{Error, Result};

/// A forward-only sequence of decoded rows, fetched lazily in batches from
/// the driver.
///
/// The stream is bound to the transaction attempt that produced it: it holds
/// the attempt's liveness flag and every read checks it first. Once the
/// transaction has committed or rolled back, reads fail with
/// `Error::StreamClosed`: a stream that leaks out of its transaction is a
/// programming error, rejected rather than silently tolerated.
pub struct RowStream<C: RowCodec> {
    /// None once the driver reported the row set exhausted.
    source: Option<Box<dyn RowBatchSource>>,
    codec: C,
    live: Arc<AtomicBool>,
    buffer: VecDeque<RawRow>,
}

impl<C: RowCodec> RowStream<C> {
    pub(crate) fn new(source: Box<dyn RowBatchSource>, codec: C, live: Arc<AtomicBool>) -> Self {
        Self {
            source: Some(source),
            codec,
            live,
            buffer: VecDeque::new(),
        }
    }

    /// A stream with no rows, used when a command produced no row set.
    pub(crate) fn empty(codec: C, live: Arc<AtomicBool>) -> Self {
        Self {
            source: None,
            codec,
            live,
            buffer: VecDeque::new(),
        }
    }

    /// The next decoded row, or `None` once the row set is exhausted.
    ///
    /// Pulls another batch from the driver when the local buffer runs dry,
    /// so consuming the stream drives further network fetches.
    pub async fn next(&mut self) -> Result<Option<C::Row>> {
        if !self.live.load(Ordering::SeqCst) {
            return Err(Error::StreamClosed);
        }

        loop {
            if let Some(raw) = self.buffer.pop_front() {
                return self.codec.decode_row(&raw).map(Some);
            }
            let Some(source) = self.source.as_mut() else {
                return Ok(None);
            };
            match source.next_batch().await? {
                Some(batch) => self.buffer.extend(batch),
                None => {
                    self.source = None;
                    return Ok(None);
                }
            }
        }
    }

    /// Drain the stream into a vector.
    pub async fn collect(mut self) -> Result<Vec<C::Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RawRows;
    use crate::mock::MockBatchSource;
    use crate::types::RawValue;

    fn live() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(true))
    }

    fn row(n: i64) -> RawRow {
        vec![RawValue::Int(n)]
    }

    #[tokio::test]
    async fn batches_are_fetched_on_demand() {
        let source = MockBatchSource::new(vec![vec![row(1), row(2)], vec![row(3)]]);
        let fetches = source.fetches();
        let mut stream = RowStream::new(Box::new(source), RawRows, live());

        assert_eq!(stream.next().await.unwrap(), Some(row(1)));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        assert_eq!(stream.next().await.unwrap(), Some(row(2)));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        assert_eq!(stream.next().await.unwrap(), Some(row(3)));
        assert_eq!(fetches.load(Ordering::SeqCst), 2);

        assert_eq!(stream.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_stream_yields_nothing() {
        let mut stream = RowStream::empty(RawRows, live());
        assert_eq!(stream.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn read_after_transaction_end_is_rejected() {
        let flag = live();
        let source = MockBatchSource::new(vec![vec![row(1)]]);
        let mut stream = RowStream::new(Box::new(source), RawRows, Arc::clone(&flag));

        assert_eq!(stream.next().await.unwrap(), Some(row(1)));

        flag.store(false, Ordering::SeqCst);
        assert!(matches!(stream.next().await, Err(Error::StreamClosed)));
    }

    #[tokio::test]
    async fn collect_drains_all_batches() {
        let source = MockBatchSource::new(vec![vec![row(1)], vec![], vec![row(2), row(3)]]);
        let stream = RowStream::new(Box::new(source), RawRows, live());
        let rows = stream.collect().await.unwrap();
        assert_eq!(rows, vec![row(1), row(2), row(3)]);
    }
}
