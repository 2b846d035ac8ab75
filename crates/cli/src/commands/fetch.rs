use std::io::Write;

use anyhow::anyhow;
use tsbridge::{Bridge, FetchOptions};

use crate::cli::FetchArgs;
use crate::error::Result;

pub(super) async fn run(bridge: Bridge, args: FetchArgs) -> Result<()> {
	let mut options = FetchOptions::new(args.url);
	if let Some(method) = args.method {
		options = options.method(method);
	}
	for header in &args.headers {
		let (name, value) = parse_header(header)?;
		options = options.header(name, value);
	}
	if let Some(body) = args.data {
		options = options.body(body);
	}

	let response = bridge.fetch(options).await?;
	let body = response.bytes().await?;

	let mut stdout = std::io::stdout().lock();
	if args.include {
		writeln!(stdout, "HTTP/1.1 {}", response.status_text())?;
		for (name, values) in response.headers() {
			for value in values {
				writeln!(stdout, "{name}: {value}")?;
			}
		}
		writeln!(stdout)?;
	} else if !response.ok() {
		eprintln!("{}", response.status_text());
	}
	stdout.write_all(&body)?;
	stdout.flush()?;
	Ok(())
}

/// Splits a `Name: value` header argument.
fn parse_header(raw: &str) -> Result<(&str, &str)> {
	let (name, value) = raw
		.split_once(':')
		.ok_or_else(|| anyhow!("header {raw:?} is not in `Name: value` form"))?;
	let name = name.trim();
	if name.is_empty() {
		return Err(anyhow!("header {raw:?} has an empty name").into());
	}
	Ok((name, value.trim()))
}
