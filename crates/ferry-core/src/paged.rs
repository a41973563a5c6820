//! Paged partition reader.
//!
//! Turns repeated `fetch_page` calls into a lazy, forward-only stream of
//! records using keyset pagination: each page starts strictly after the last
//! key of the previous one. A page shorter than the page size ends the stream.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tracing::debug;

use crate::error::CopyError;
use crate::partitioned::Partition;
use crate::record::Record;
use crate::source::SourceReader;

pub type RecordStream = BoxStream<'static, Result<Record, CopyError>>;

/// Reads one partition of the source, one page at a time.
pub struct PagedReader {
    source: Arc<dyn SourceReader>,
    partition: Partition,
    page_size: usize,
}

enum Cursor {
    Start,
    After(i64),
    Exhausted,
}

impl PagedReader {
    pub fn new(source: Arc<dyn SourceReader>, partition: Partition, page_size: usize) -> Self {
        Self {
            source,
            partition,
            page_size: page_size.max(1),
        }
    }

    /// Open the partition. Restart by opening again; there is no seek.
    pub fn open(self) -> RecordStream {
        let Self {
            source,
            partition,
            page_size,
        } = self;

        stream::try_unfold(Cursor::Start, move |cursor| {
            let source = Arc::clone(&source);
            async move {
                let after = match cursor {
                    Cursor::Start => None,
                    Cursor::After(key) => Some(key),
                    Cursor::Exhausted => return Ok(None),
                };

                let page = source.fetch_page(&partition, after, page_size).await?;
                debug!(
                    "Partition {}: fetched page of {} rows after {:?}",
                    partition.index,
                    page.len(),
                    after
                );

                let next = match page.last() {
                    Some(last) if page.len() >= page_size => Cursor::After(last.id),
                    _ => Cursor::Exhausted,
                };
                if page.is_empty() {
                    return Ok(None);
                }
                Ok::<_, CopyError>(Some((page, next)))
            }
        })
        .map_ok(|page| stream::iter(page.into_iter().map(Ok::<Record, CopyError>)))
        .try_flatten()
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partitioned::Domain;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Serves keys `1..=n` and records every call it receives.
    struct CountingSource {
        n: i64,
        calls: Mutex<Vec<Option<i64>>>,
        fail_after: Option<i64>,
    }

    impl CountingSource {
        fn new(n: i64) -> Self {
            Self {
                n,
                calls: Mutex::new(Vec::new()),
                fail_after: None,
            }
        }
    }

    #[async_trait]
    impl SourceReader for CountingSource {
        async fn probe(&self) -> Result<Domain, CopyError> {
            Ok(Domain::new(1, self.n))
        }

        async fn fetch_page(
            &self,
            partition: &Partition,
            after: Option<i64>,
            limit: usize,
        ) -> Result<Vec<Record>, CopyError> {
            self.calls.lock().unwrap().push(after);
            if after.is_some() && after == self.fail_after {
                return Err(CopyError::SourceRead("connection reset".to_string()));
            }
            let start = after.map(|k| k + 1).unwrap_or(partition.min_value);
            Ok((start..partition.max_value.unwrap_or(i64::MAX).min(self.n + 1))
                .take(limit)
                .map(|id| Record::new(id, vec![]))
                .collect())
        }
    }

    fn part(min: i64, max: i64) -> Partition {
        Partition {
            index: 0,
            min_value: min,
            max_value: Some(max),
        }
    }

    #[tokio::test]
    async fn reads_partition_in_order_across_pages() {
        let source = Arc::new(CountingSource::new(100));
        let ids: Vec<i64> = PagedReader::new(source.clone(), part(11, 36), 10)
            .open()
            .map_ok(|r| r.id)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(ids, (11..36).collect::<Vec<_>>());
        assert_eq!(*source.calls.lock().unwrap(), vec![None, Some(20), Some(30)]);
    }

    #[tokio::test]
    async fn full_last_page_costs_one_extra_empty_read() {
        let source = Arc::new(CountingSource::new(100));
        let count = PagedReader::new(source.clone(), part(1, 21), 10)
            .open()
            .try_fold(0usize, |n, _| async move { Ok(n + 1) })
            .await
            .unwrap();

        assert_eq!(count, 20);
        assert_eq!(source.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn empty_partition_yields_nothing() {
        let source = Arc::new(CountingSource::new(5));
        let records: Vec<Record> = PagedReader::new(source, part(50, 60), 10)
            .open()
            .try_collect()
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn read_error_surfaces_after_earlier_records() {
        let mut source = CountingSource::new(100);
        source.fail_after = Some(10);
        let mut stream = PagedReader::new(Arc::new(source), part(1, 101), 10).open();

        for expected in 1..=10 {
            assert_eq!(stream.next().await.unwrap().unwrap().id, expected);
        }
        assert!(matches!(
            stream.next().await,
            Some(Err(CopyError::SourceRead(_)))
        ));
    }
}
