// Streaming extraction: pages the source bucket by (timestamp, series_key)
// cursor and assembles chunks that close only at timestamp boundaries, so a
// chunk's exclusive end is always a sound checkpoint boundary. Nothing
// beyond one page plus the current chunk is ever held in memory.

use std::time::Duration;

use crate::error::{EtlError, StoreError};
use crate::models::{Chunk, RawRecord, TimeRange};
use crate::retry::RetryPolicy;
use crate::source_repo::{PageCursor, SourceStore};

pub struct Extractor<'a, S: SourceStore> {
    source: &'a S,
    /// Full range this extractor walks (the fresh window or the resume tail).
    range: TimeRange,
    chunk_size: usize,
    measurements: Vec<String>,
    retry: RetryPolicy,
    timeout: Duration,
    cursor: Option<PageCursor>,
    /// Records already fetched that belong to the next chunk (the tail of a
    /// page past a chunk's closing timestamp).
    carry: Vec<RawRecord>,
    /// Start of the next chunk's sub-range (= last emitted boundary).
    chunk_start: i64,
    done: bool,
}

impl<'a, S: SourceStore> Extractor<'a, S> {
    pub fn new(
        source: &'a S,
        range: TimeRange,
        chunk_size: usize,
        measurements: Vec<String>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            range,
            chunk_size,
            measurements,
            retry,
            timeout,
            cursor: None,
            carry: Vec::new(),
            chunk_start: range.start,
            done: false,
        }
    }

    /// Next chunk in (timestamp, series_key) order, or None when the range is
    /// exhausted. Chunks partition [range.start, range.end) contiguously; the
    /// final chunk's range ends at range.end.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, EtlError> {
        if self.done {
            return Ok(None);
        }

        let mut records = std::mem::take(&mut self.carry);

        loop {
            let page = self.fetch_page().await?;

            if let Some(last) = page.last() {
                self.cursor = Some(PageCursor {
                    timestamp: last.timestamp,
                    series_key: last.series_key.clone(),
                });
            }
            let exhausted = page.len() < self.chunk_size;
            records.extend(page);

            if exhausted {
                self.done = true;
                if records.is_empty() {
                    return Ok(None);
                }
                let range = TimeRange::new(self.chunk_start, self.range.end);
                return Ok(Some(Chunk { records, range }));
            }

            if records.len() >= self.chunk_size {
                // Close at the last complete timestamp: records sharing the
                // page's final timestamp may continue into the next page.
                let cut_ts = records[records.len() - 1].timestamp;
                if let Some(cut_at) = records.iter().rposition(|r| r.timestamp < cut_ts) {
                    self.carry = records.split_off(cut_at + 1);
                    let range = TimeRange::new(self.chunk_start, cut_ts);
                    self.chunk_start = cut_ts;
                    return Ok(Some(Chunk { records, range }));
                }
                // Every collected record shares one timestamp: keep pulling
                // until it changes. The chunk grows past chunk_size, which the
                // boundary contract requires.
            }
        }
    }

    async fn fetch_page(&self) -> Result<Vec<RawRecord>, EtlError> {
        let range = self.range;
        let limit = self.chunk_size;
        self.retry
            .run("fetch_page", || async {
                let fut =
                    self.source
                        .fetch_page(range, self.cursor.as_ref(), limit, &self.measurements);
                match tokio::time::timeout(self.timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(StoreError::Transient(format!(
                        "fetch_page timed out after {:?}",
                        self.timeout
                    ))),
                }
            })
            .await
            .map_err(|source| EtlError::ChunkExtraction {
                range: TimeRange::new(self.chunk_start, self.range.end),
                source,
            })
    }
}
