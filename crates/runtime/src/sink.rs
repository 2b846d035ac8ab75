//! Supervised invocation of host-supplied callbacks.
//!
//! Host callbacks are foreign code from the bridge's point of view. Every call
//! goes through [`guarded`], which turns a panic into a [`HandlerFault`]
//! value instead of unwinding into the dispatcher that made the call.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;

/// A host callback panicked while the bridge was invoking it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{callback} panicked: {message}")]
pub struct HandlerFault {
	pub callback: &'static str,
	pub message: String,
}

/// Consumer of bridge events whose `deliver` never raises.
pub trait CallbackSink<E>: Send + Sync {
	fn deliver(&self, event: E);
}

/// Runs `f`, converting a panic into a [`HandlerFault`] attributed to `callback`.
pub fn guarded<R>(callback: &'static str, f: impl FnOnce() -> R) -> Result<R, HandlerFault> {
	panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| HandlerFault {
		callback,
		message: panic_message(payload.as_ref()),
	})
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&str>() {
		(*s).to_string()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"non-string panic payload".to_string()
	}
}
