use clap::Parser;
use tsbridge_cli::cli::Cli;
use tsbridge_cli::{commands, logging};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	if let Err(err) = commands::dispatch(cli).await {
		eprintln!("error: {err}");
		for cause in err.chain().skip(1) {
			eprintln!("  caused by: {cause}");
		}
		std::process::exit(err.exit_code());
	}
}
