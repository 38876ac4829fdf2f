use super::{ResponseFormat, StreamNormalizer};
use bytes::Bytes;
use futures_core::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};

pin_project! {
    /// Adapts a raw byte stream into rendered-text snapshots.
    ///
    /// Yields the full text after every chunk that changed it, and a last
    /// snapshot at end of stream if flushing changed it again. An error from
    /// the underlying stream is passed through and ends the stream.
    pub struct NormalizedStream<S> {
        #[pin]
        inner: S,
        normalizer: Box<dyn StreamNormalizer>,
        last: String,
        done: bool,
    }
}

impl<S, E> NormalizedStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    pub fn new(inner: S, format: ResponseFormat) -> Self {
        Self::with_normalizer(inner, format.normalizer())
    }

    pub fn with_normalizer(inner: S, normalizer: Box<dyn StreamNormalizer>) -> Self {
        Self {
            inner,
            normalizer,
            last: String::new(),
            done: false,
        }
    }
}

impl<S, E> Stream for NormalizedStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    type Item = Result<String, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if *this.done {
                return Poll::Ready(None);
            }

            let rendered = match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => this.normalizer.feed(&chunk),
                Poll::Ready(Some(Err(e))) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    *this.done = true;
                    this.normalizer.finish()
                }
                Poll::Pending => return Poll::Pending,
            };

            if rendered != *this.last {
                *this.last = rendered.clone();
                return Poll::Ready(Some(Ok(rendered)));
            }
        }
    }
}
