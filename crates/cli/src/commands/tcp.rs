use std::io::Write;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tracing::{debug, warn};
use tsbridge::{Bridge, ReadSink, TcpOptions};

use crate::cli::TcpArgs;
use crate::error::Result;

const STDIN_CHUNK: usize = 16 * 1024;

/// Copies stdin to the session and the session to stdout until either side ends.
pub(super) async fn run(bridge: Bridge, args: TcpArgs) -> Result<()> {
	let timeout = args.connect_timeout()?;
	let mut options = TcpOptions::new(args.host, args.port);
	if let Some(timeout) = timeout {
		options = options.with_connect_timeout(timeout);
	}

	let sink: Arc<dyn ReadSink> = Arc::new(|bytes: &[u8]| {
		let mut stdout = std::io::stdout().lock();
		if let Err(err) = stdout.write_all(bytes).and_then(|()| stdout.flush()) {
			warn!(target = "tsbridge_cli", error = %err, "stdout write failed");
		}
	});
	let session = bridge.tcp(options, sink).await?;
	eprintln!("connected to {} ({})", session.remote_addr(), session.peer_addr());

	let mut stdin = tokio::io::stdin();
	let mut buf = vec![0u8; STDIN_CHUNK];
	loop {
		tokio::select! {
			_ = session.closed() => {
				debug!(target = "tsbridge_cli", "remote closed the session");
				break;
			}
			read = stdin.read(&mut buf) => {
				let n = read?;
				if n == 0 {
					break;
				}
				session.write(&buf[..n]).await?;
			}
		}
	}

	session.close().await?;
	Ok(())
}
