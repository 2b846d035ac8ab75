//! Supervised access to the host's terminal hooks.

use std::sync::Arc;

use tracing::warn;
use tsbridge_protocol::ShellStage;
use tsbridge_runtime::{HandlerFault, guarded};

use super::{ShellInput, TerminalCallbacks};
use crate::registry::SessionId;

pub(crate) struct Terminal {
	id: SessionId,
	callbacks: Arc<dyn TerminalCallbacks>,
	stdout: OutputDecoder,
	stderr: OutputDecoder,
}

impl Terminal {
	pub(crate) fn new(id: SessionId, callbacks: Arc<dyn TerminalCallbacks>) -> Self {
		Self {
			id,
			callbacks,
			stdout: OutputDecoder::default(),
			stderr: OutputDecoder::default(),
		}
	}

	pub(crate) fn progress(&self, message: &str) {
		self.supervise(guarded("onConnectionProgress", || self.callbacks.on_connection_progress(message)));
	}

	pub(crate) fn connected(&self) {
		self.supervise(guarded("onConnected", || self.callbacks.on_connected()));
	}

	pub(crate) fn report(&self, stage: ShellStage, reason: impl std::fmt::Display) {
		let line = stage.report(reason);
		self.supervise(guarded("writeErrorFn", || self.callbacks.write_error(&line)));
	}

	pub(crate) fn set_read(&self, input: ShellInput) -> Result<(), HandlerFault> {
		guarded("setReadFn", || self.callbacks.set_read(input))
	}

	pub(crate) fn stdout(&mut self, data: &[u8]) {
		let text = self.stdout.decode(data);
		self.write(&text);
	}

	pub(crate) fn stderr(&mut self, data: &[u8]) {
		let text = self.stderr.decode(data);
		self.write(&text);
	}

	fn write(&self, text: &str) {
		if !text.is_empty() {
			self.supervise(guarded("writeFn", || self.callbacks.write(text)));
		}
	}

	fn supervise(&self, result: Result<(), HandlerFault>) {
		if let Err(fault) = result {
			warn!(target = "tsbridge", session = self.id, callback = fault.callback, error = %fault, "terminal callback panicked");
		}
	}
}

/// Calls `on_done` when dropped, so every exit path of the session task signals it.
pub(crate) struct DoneGuard {
	id: SessionId,
	callbacks: Arc<dyn TerminalCallbacks>,
}

impl DoneGuard {
	pub(crate) fn new(id: SessionId, callbacks: Arc<dyn TerminalCallbacks>) -> Self {
		Self { id, callbacks }
	}
}

impl Drop for DoneGuard {
	fn drop(&mut self) {
		if let Err(fault) = guarded("onDone", || self.callbacks.on_done()) {
			warn!(target = "tsbridge", session = self.id, error = %fault, "onDone panicked");
		}
	}
}

/// Turns raw shell output into terminal text.
///
/// UTF-8 sequences split across reads are held back until complete, and bare
/// `\n` becomes `\r\n`.
#[derive(Default)]
pub(crate) struct OutputDecoder {
	partial: Vec<u8>,
	last_was_cr: bool,
}

impl OutputDecoder {
	pub(crate) fn decode(&mut self, data: &[u8]) -> String {
		self.partial.extend_from_slice(data);
		let mut text = String::with_capacity(self.partial.len());

		loop {
			match std::str::from_utf8(&self.partial) {
				Ok(s) => {
					text.push_str(s);
					self.partial.clear();
					break;
				}
				Err(err) => {
					let valid = err.valid_up_to();
					text.push_str(&String::from_utf8_lossy(&self.partial[..valid]));
					match err.error_len() {
						Some(bad) => {
							text.push(char::REPLACEMENT_CHARACTER);
							self.partial.drain(..valid + bad);
						}
						None => {
							self.partial.drain(..valid);
							break;
						}
					}
				}
			}
		}

		self.translate_newlines(&text)
	}

	fn translate_newlines(&mut self, text: &str) -> String {
		let mut out = String::with_capacity(text.len() + text.len() / 16);
		for c in text.chars() {
			if c == '\n' && !self.last_was_cr {
				out.push('\r');
			}
			out.push(c);
			self.last_was_cr = c == '\r';
		}
		out
	}
}
