use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tsbridge::{Bridge, ShellInput, TerminalCallbacks, TerminalConfig, TerminalOptions};

use crate::cli::SshArgs;
use crate::error::{CliError, Result};

/// Line-mode terminal on the process's stdio.
#[derive(Default)]
struct StdioTerminal {
	input: Mutex<Option<ShellInput>>,
	failed: AtomicBool,
	done: Notify,
}

impl TerminalCallbacks for StdioTerminal {
	fn write(&self, data: &str) {
		let mut stdout = std::io::stdout().lock();
		let _ = stdout.write_all(data.as_bytes()).and_then(|()| stdout.flush());
	}

	fn write_error(&self, message: &str) {
		self.failed.store(true, Ordering::SeqCst);
		eprint!("{message}");
	}

	fn set_read(&self, input: ShellInput) {
		*self.input.lock() = Some(input);
	}

	fn on_connection_progress(&self, message: &str) {
		eprintln!("{message}");
	}

	fn on_done(&self) {
		self.done.notify_one();
	}
}

pub(super) async fn run(bridge: Bridge, args: SshArgs) -> Result<()> {
	let default_user = std::env::var("USER").unwrap_or_else(|_| "root".to_string());
	let (user, host) = args.user_and_host(&default_user);

	let options = TerminalOptions {
		timeout_seconds: args.timeout,
		..TerminalOptions::new(args.rows, args.cols)
	};
	options.validate()?;

	let terminal = Arc::new(StdioTerminal::default());
	let session = bridge.ssh(host, user, TerminalConfig::new(options, Arc::clone(&terminal) as Arc<dyn TerminalCallbacks>));

	let mut lines = BufReader::new(tokio::io::stdin()).lines();
	loop {
		tokio::select! {
			_ = terminal.done.notified() => break,
			line = lines.next_line() => match line? {
				Some(line) => {
					let input = terminal.input.lock().clone();
					match input {
						Some(input) => {
							input.send(&format!("{line}\n"));
						}
						None => eprintln!("shell not ready, input dropped"),
					}
				}
				None => {
					if session.state().is_terminal() {
						break;
					}
					session.abort();
					terminal.done.notified().await;
					break;
				}
			},
		}
	}

	if terminal.failed.load(Ordering::SeqCst) {
		return Err(CliError::ShellFailed);
	}
	Ok(())
}
