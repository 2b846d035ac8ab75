use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Overrides the verbosity flags when set; takes precedence over `RUST_LOG`.
pub const LOG_ENV: &str = "TSBRIDGE_LOG";

/// Default directives for a `-v` count. Bridge internals are off at zero.
pub fn default_directives(verbosity: u8) -> &'static str {
	match verbosity {
		0 => "error,tsbridge=off,tsbridge_cli=error,russh=off",
		1 => "info,tsbridge=warn,tsbridge_cli=info,russh=warn",
		2 => "info,tsbridge=debug,tsbridge_cli=debug,russh=info",
		_ => "trace,hyper=debug,rustls=debug",
	}
}

/// Picks the first usable directive set: `override_directives`, then `RUST_LOG`, then the flag default.
pub fn filter(verbosity: u8, override_directives: Option<&str>) -> EnvFilter {
	override_directives
		.and_then(|directives| EnvFilter::try_new(directives).ok())
		.or_else(|| EnvFilter::try_from_default_env().ok())
		.unwrap_or_else(|| EnvFilter::new(default_directives(verbosity)))
}

pub fn init_logging(verbosity: u8) {
	let override_directives = std::env::var(LOG_ENV).ok();
	let env_filter = filter(verbosity, override_directives.as_deref());

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);
	let detailed = verbosity >= 2;

	let installed = tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_ansi(std::io::stderr().is_terminal())
		.with_target(detailed)
		.with_file(detailed)
		.with_line_number(detailed)
		.compact()
		.try_init();
	if installed.is_err() {
		tracing::debug!(target = "tsbridge_cli", "subscriber already installed");
	}
}
