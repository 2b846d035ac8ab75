//! Handles for background operations.
//!
//! Every bridge request returns a [`Pending`] immediately and runs its work on
//! the runtime. The outcome reaches the caller exactly once, either by
//! awaiting the handle or through [`Pending::settle`] for hosts that cannot
//! poll futures themselves.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// Outcome of a background operation, settled exactly once.
#[must_use = "a Pending does nothing unless awaited or settled"]
pub struct Pending<T> {
	state: State<T>,
}

enum State<T> {
	Ready(Option<Result<T>>),
	Waiting(oneshot::Receiver<Result<T>>),
}

impl<T> Unpin for Pending<T> {}

impl<T: Send + 'static> Pending<T> {
	/// Runs `work` on `handle` and returns its handle without waiting.
	pub fn spawn<F>(handle: &Handle, work: F) -> Self
	where
		F: Future<Output = Result<T>> + Send + 'static,
	{
		let (tx, rx) = oneshot::channel();
		handle.spawn(async move {
			// A dropped receiver means nobody is interested in the outcome.
			let _ = tx.send(work.await);
		});
		Self {
			state: State::Waiting(rx),
		}
	}

	/// Delivers the outcome to `callback` once it is known.
	pub fn settle<F>(self, handle: &Handle, callback: F)
	where
		F: FnOnce(Result<T>) + Send + 'static,
	{
		handle.spawn(async move { callback(self.await) });
	}
}

impl<T> Pending<T> {
	pub fn resolved(value: T) -> Self {
		Self::from_result(Ok(value))
	}

	/// Already-rejected handle; no task is spawned.
	pub fn rejected(err: impl Into<Error>) -> Self {
		Self::from_result(Err(err.into()))
	}

	pub fn from_result(result: Result<T>) -> Self {
		Self {
			state: State::Ready(Some(result)),
		}
	}
}

impl<T> Future for Pending<T> {
	type Output = Result<T>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match &mut self.get_mut().state {
			State::Ready(slot) => Poll::Ready(slot.take().unwrap_or(Err(Error::TaskAborted))),
			State::Waiting(rx) => match Pin::new(rx).poll(cx) {
				Poll::Ready(result) => Poll::Ready(result.unwrap_or(Err(Error::TaskAborted))),
				Poll::Pending => Poll::Pending,
			},
		}
	}
}
