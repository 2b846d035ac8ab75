//! Ordered relay of engine notifications to the host.
//!
//! The engine invokes its notify callback from its own tasks. The callback
//! installed here only enqueues; a single dispatcher task drains the queue and
//! calls the host's [`NotifyCallbacks`] one event at a time, in emission
//! order. Host callbacks run supervised: a panic is reported through
//! `notify_panic_recover` and the next event is delivered as usual.

mod snapshot;

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use tsbridge_protocol::BackendState;

pub use self::snapshot::snapshot_from_net_map;
use crate::engine::{EngineState, Notify, NotifyCallback};
use crate::sink::{CallbackSink, HandlerFault, guarded};

/// Host-side receivers installed by `run`.
pub trait NotifyCallbacks: Send + Sync {
	fn notify_state(&self, state: &str);

	/// Receives a JSON-serialized network snapshot.
	fn notify_net_map(&self, net_map_json: &str);

	fn notify_browse_to_url(&self, url: &str);

	fn notify_panic_recover(&self, message: &str);
}

/// Event handed to the host, already translated from the engine's model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierEvent {
	State(BackendState),
	NetMap(String),
	BrowseToUrl(String),
}

/// Host callbacks wrapped so that delivery never unwinds into the dispatcher.
pub struct SupervisedCallbacks {
	callbacks: Arc<dyn NotifyCallbacks>,
}

impl SupervisedCallbacks {
	pub fn new(callbacks: Arc<dyn NotifyCallbacks>) -> Self {
		Self { callbacks }
	}

	/// Surfaces an error condition to the host through the panic-recover sink.
	pub fn report(&self, message: &str) {
		if let Err(fault) = guarded("notifyPanicRecover", || self.callbacks.notify_panic_recover(message)) {
			error!(target = "tsbridge", error = %fault, "panic-recover handler failed");
		}
	}

	fn report_fault(&self, fault: &HandlerFault) {
		warn!(target = "tsbridge", callback = fault.callback, error = %fault, "host callback panicked");
		self.report(&fault.message);
	}
}

impl CallbackSink<NotifierEvent> for SupervisedCallbacks {
	fn deliver(&self, event: NotifierEvent) {
		let callbacks = &self.callbacks;
		let result = match &event {
			NotifierEvent::State(state) => guarded("notifyState", || callbacks.notify_state(state.as_str())),
			NotifierEvent::NetMap(json) => guarded("notifyNetMap", || callbacks.notify_net_map(json)),
			NotifierEvent::BrowseToUrl(url) => guarded("notifyBrowseToURL", || callbacks.notify_browse_to_url(url)),
		};
		if let Err(fault) = result {
			self.report_fault(&fault);
		}
	}
}

/// The process-wide receiver of engine notifications.
pub struct NetworkNotifier {
	tx: mpsc::UnboundedSender<Notify>,
	task: JoinHandle<()>,
}

impl NetworkNotifier {
	/// Starts the dispatcher and queues the initial `NoState` announcement.
	pub fn spawn(handle: &Handle, callbacks: Arc<dyn NotifyCallbacks>) -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		// Receiver is alive until the task below ends, so this cannot fail.
		let _ = tx.send(Notify::state(EngineState::NO_STATE));
		let task = handle.spawn(dispatch_loop(rx, SupervisedCallbacks::new(callbacks)));
		Self { tx, task }
	}

	/// Callback to install on the engine with `set_notify_callback`.
	pub fn engine_callback(&self) -> NotifyCallback {
		let tx = self.tx.clone();
		Box::new(move |notify| {
			if tx.send(notify).is_err() {
				debug!(target = "tsbridge", "notifier stopped, dropping engine notification");
			}
		})
	}

	pub fn is_running(&self) -> bool {
		!self.task.is_finished()
	}

	/// Stops delivering; queued notifications are discarded.
	pub fn stop(&self) {
		self.task.abort();
	}
}

impl Drop for NetworkNotifier {
	fn drop(&mut self) {
		self.task.abort();
	}
}

async fn dispatch_loop(mut rx: mpsc::UnboundedReceiver<Notify>, sink: SupervisedCallbacks) {
	while let Some(notify) = rx.recv().await {
		if let Err(fault) = guarded("notify", || dispatch(&sink, notify)) {
			sink.report_fault(&fault);
		}
	}
	debug!(target = "tsbridge", "engine notification channel closed");
}

fn dispatch(sink: &SupervisedCallbacks, notify: Notify) {
	debug!(
		target = "tsbridge",
		state = ?notify.state,
		net_map = notify.net_map.is_some(),
		browse_to_url = notify.browse_to_url.is_some(),
		"engine notification"
	);

	if let Some(code) = notify.state {
		match code.backend() {
			Some(state) => sink.deliver(NotifierEvent::State(state)),
			None => {
				error!(target = "tsbridge", code = code.0, "unmapped backend state");
				sink.report(&format!("unmapped backend state {}", code.0));
			}
		}
	}

	if let Some(net_map) = &notify.net_map {
		match snapshot_from_net_map(net_map).to_json() {
			Ok(json) => sink.deliver(NotifierEvent::NetMap(json)),
			Err(err) => warn!(target = "tsbridge", error = %err, "could not serialize network snapshot"),
		}
	}

	if let Some(url) = notify.browse_to_url {
		sink.deliver(NotifierEvent::BrowseToUrl(url));
	}
}
