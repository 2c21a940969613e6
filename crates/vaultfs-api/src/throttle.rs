//! Rate-limited byte streams for direct-link downloads.

use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use tokio::time::{Instant, Sleep};

/// Smallest slice handed out per poll.
const MIN_QUANTUM: usize = 1024;

pin_project! {
    /// Paces an inner stream to `rate` bytes per second.
    ///
    /// Chunks are cut into slices of about a tenth of a second's worth, and
    /// each slice is released only once the bytes before it are within budget.
    pub struct Throttled<S> {
        #[pin]
        inner: S,
        rate: u64,
        quantum: usize,
        start: Instant,
        sent: u64,
        buffer: Bytes,
        sleep: Option<Pin<Box<Sleep>>>,
    }
}

impl<S> Throttled<S> {
    /// Throttle `inner` to `rate` bytes per second. A zero rate is treated
    /// as one byte per second.
    pub fn new(inner: S, rate: u64) -> Self {
        let rate = rate.max(1);
        Self {
            inner,
            rate,
            quantum: ((rate / 10) as usize).max(MIN_QUANTUM),
            start: Instant::now(),
            sent: 0,
            buffer: Bytes::new(),
            sleep: None,
        }
    }
}

impl<S, E> Stream for Throttled<S>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if let Some(sleep) = this.sleep.as_mut() {
                ready!(sleep.as_mut().poll(cx));
                *this.sleep = None;
            }

            if this.buffer.is_empty() {
                match ready!(this.inner.as_mut().poll_next(cx)) {
                    Some(Ok(chunk)) => {
                        *this.buffer = chunk;
                        continue;
                    }
                    other => return Poll::Ready(other),
                }
            }

            let due = *this.start + Duration::from_secs_f64(*this.sent as f64 / *this.rate as f64);
            if due > Instant::now() {
                *this.sleep = Some(Box::pin(tokio::time::sleep_until(due)));
                continue;
            }

            let n = (*this.quantum).min(this.buffer.len());
            let slice = this.buffer.split_to(n);
            *this.sent += n as u64;
            return Poll::Ready(Some(Ok(slice)));
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_paces_to_rate() {
        let body = futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from(
            vec![7u8; 3000],
        ))]);
        let started = Instant::now();
        let out: Vec<Bytes> = Throttled::new(body, 1000)
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        let total: usize = out.iter().map(|b| b.len()).sum();
        assert_eq!(total, 3000);
        assert_eq!(out.len(), 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_pass_through() {
        let body = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"ok")),
            Err(std::io::Error::other("boom")),
        ]);
        let out: Vec<_> = Throttled::new(body, 10_000).collect().await;
        assert_eq!(out.len(), 2);
        assert!(out[1].is_err());
    }
}
