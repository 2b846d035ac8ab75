use serde_json::json;
use tsbridge::Bridge;

use crate::cli::ResolveArgs;
use crate::direct::parse_a_records;
use crate::error::Result;

/// Prints the raw answer (base64) and resolvers, plus any A records decoded from it.
pub(super) async fn run(bridge: Bridge, args: ResolveArgs) -> Result<()> {
	let result = bridge.resolve(&args.name).await?;
	let addresses: Vec<String> = parse_a_records(&result.result)
		.unwrap_or_default()
		.into_iter()
		.map(|ip| ip.to_string())
		.collect();

	let mut report = serde_json::to_value(&result)?;
	report["name"] = json!(args.name);
	report["addresses"] = json!(addresses);
	println!("{}", serde_json::to_string_pretty(&report)?);
	Ok(())
}
