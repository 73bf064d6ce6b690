use core::pin::Pin;
use core::task::{Context, Poll};
use futures::{Future, Stream};
use pin_project_lite::pin_project;
use pollcdc_config::shared::BatchConfig;
use std::time::Duration;

/// Item produced by a [`FetchBatchStream`].
#[derive(Debug, PartialEq)]
pub enum BatchEvent<T> {
    /// A batch of at least one item.
    Batch(Vec<T>),
    /// The inner stream did not yield anything within the stall timeout.
    ///
    /// The stream ends after this event and buffered items are dropped.
    Stalled,
}

// Batching adapted from:
//  https://github.com/tokio-rs/tokio/blob/master/tokio-stream/src/stream_ext/chunks_timeout.rs.
pin_project! {
    /// A stream adapter grouping the items of a fetch into bounded batches.
    ///
    /// A batch is emitted when it reaches `max_size` items or when `max_fill_ms` elapsed since
    /// its first item. Independently, the inner stream must yield an item (or end) within
    /// `stall_timeout` of being polled, otherwise [`BatchEvent::Stalled`] is emitted. Time spent
    /// by the consumer between batches does not count towards the stall timeout.
    #[must_use = "streams do nothing unless polled"]
    #[derive(Debug)]
    pub struct FetchBatchStream<S: Stream> {
        #[pin]
        stream: S,
        #[pin]
        fill_deadline: Option<tokio::time::Sleep>,
        #[pin]
        stall_deadline: tokio::time::Sleep,
        items: Vec<S::Item>,
        batch_config: BatchConfig,
        stall_timeout: Duration,
        rearm_stall: bool,
        ended: bool,
    }
}

impl<S: Stream> FetchBatchStream<S> {
    pub fn wrap(stream: S, batch_config: BatchConfig, stall_timeout: Duration) -> Self {
        Self {
            stream,
            fill_deadline: None,
            stall_deadline: tokio::time::sleep(stall_timeout),
            items: Vec::with_capacity(batch_config.max_size),
            batch_config,
            stall_timeout,
            rearm_stall: false,
            ended: false,
        }
    }
}

impl<S: Stream> Stream for FetchBatchStream<S> {
    type Item = BatchEvent<S::Item>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if *this.ended {
            return Poll::Ready(None);
        }

        // The stall clock only runs while the consumer waits on this stream.
        if *this.rearm_stall {
            *this.rearm_stall = false;
            let deadline = tokio::time::Instant::now() + *this.stall_timeout;
            this.stall_deadline.as_mut().reset(deadline);
        }

        loop {
            match this.stream.as_mut().poll_next(cx) {
                Poll::Pending => break,
                Poll::Ready(Some(item)) => {
                    let deadline = tokio::time::Instant::now() + *this.stall_timeout;
                    this.stall_deadline.as_mut().reset(deadline);

                    if this.items.is_empty() {
                        this.fill_deadline
                            .set(Some(tokio::time::sleep(Duration::from_millis(
                                this.batch_config.max_fill_ms,
                            ))));
                    }
                    this.items.push(item);

                    if this.items.len() >= this.batch_config.max_size {
                        this.fill_deadline.set(None);
                        *this.rearm_stall = true;
                        return Poll::Ready(Some(BatchEvent::Batch(std::mem::take(this.items))));
                    }
                }
                Poll::Ready(None) => {
                    *this.ended = true;
                    this.fill_deadline.set(None);

                    if this.items.is_empty() {
                        return Poll::Ready(None);
                    }

                    return Poll::Ready(Some(BatchEvent::Batch(std::mem::take(this.items))));
                }
            }
        }

        if let Some(deadline) = this.fill_deadline.as_mut().as_pin_mut()
            && deadline.poll(cx).is_ready()
        {
            this.fill_deadline.set(None);
            *this.rearm_stall = true;
            return Poll::Ready(Some(BatchEvent::Batch(std::mem::take(this.items))));
        }

        if this.stall_deadline.poll(cx).is_ready() {
            *this.ended = true;
            this.items.clear();
            return Poll::Ready(Some(BatchEvent::Stalled));
        }

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use futures::stream;
    use std::pin::pin;

    use super::*;

    fn batch_config(max_size: usize, max_fill_ms: u64) -> BatchConfig {
        BatchConfig {
            max_size,
            max_fill_ms,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn batches_are_bounded_by_size() {
        let stream = stream::iter(1..=5);
        let batches = FetchBatchStream::wrap(stream, batch_config(2, 1000), Duration::from_secs(5))
            .collect::<Vec<_>>()
            .await;

        assert_eq!(
            batches,
            vec![
                BatchEvent::Batch(vec![1, 2]),
                BatchEvent::Batch(vec![3, 4]),
                BatchEvent::Batch(vec![5]),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_stream_yields_nothing() {
        let stream = stream::iter(Vec::<u32>::new());
        let batches = FetchBatchStream::wrap(stream, batch_config(2, 1000), Duration::from_secs(5))
            .collect::<Vec<_>>()
            .await;

        assert!(batches.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn partial_batch_is_emitted_after_fill_time() {
        let stream = stream::iter(vec![1]).chain(stream::pending());
        let mut batches = pin!(FetchBatchStream::wrap(
            stream,
            batch_config(10, 100),
            Duration::from_secs(5)
        ));

        assert_eq!(batches.next().await, Some(BatchEvent::Batch(vec![1])));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_stream_stalls_and_ends() {
        let stream = stream::iter(vec![1]).chain(stream::pending());
        let mut batches = pin!(FetchBatchStream::wrap(
            stream,
            batch_config(10, 100),
            Duration::from_secs(1)
        ));

        assert_eq!(batches.next().await, Some(BatchEvent::Batch(vec![1])));
        assert_eq!(batches.next().await, Some(BatchEvent::Stalled));
        assert_eq!(batches.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_consumer_does_not_stall_the_stream() {
        let stream = stream::iter(1..=4).then(|item| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            item
        });
        let mut batches = pin!(FetchBatchStream::wrap(
            stream,
            batch_config(2, 1000),
            Duration::from_secs(1)
        ));

        assert_eq!(batches.next().await, Some(BatchEvent::Batch(vec![1, 2])));

        // Consumer busy for longer than the stall timeout.
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(batches.next().await, Some(BatchEvent::Batch(vec![3, 4])));
        assert_eq!(batches.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn stall_is_measured_from_the_next_poll() {
        let stream = stream::iter(vec![1, 2]).chain(stream::pending());
        let mut batches = pin!(FetchBatchStream::wrap(
            stream,
            batch_config(2, 1000),
            Duration::from_secs(1)
        ));

        assert_eq!(batches.next().await, Some(BatchEvent::Batch(vec![1, 2])));
        tokio::time::sleep(Duration::from_secs(5)).await;

        let started = tokio::time::Instant::now();
        assert_eq!(batches.next().await, Some(BatchEvent::Stalled));
        assert!(started.elapsed() >= Duration::from_secs(1));
    }
}
