//! Random node names for bridges started without a hostname.

use rand::Rng;
use rand::seq::SliceRandom;

const TAILS: &[&str] = &[
	"jackal", "jaguar", "jay", "jellyfish", "jerboa", "junco", "wallaby", "walrus", "warbler", "weasel", "whale", "wolf", "wombat", "wren",
];

const SCALES: &[&str] = &[
	"salmon", "sardine", "scallop", "seahorse", "skink", "snake", "snapper", "anchovy", "angelfish", "armadillo", "axolotl", "alligator",
];

/// Returns a `<tail>-<scale>` pair such as `jaguar-skink`.
///
/// Either both words start with `j`/`s` or both with `w`/`a`.
pub fn generate_hostname() -> String {
	let mut rng = rand::thread_rng();
	let (tail_initial, scale_initial) = if rng.gen_bool(0.5) { ('j', 's') } else { ('w', 'a') };

	let tails: Vec<&str> = TAILS.iter().copied().filter(|w| w.starts_with(tail_initial)).collect();
	let scales: Vec<&str> = SCALES.iter().copied().filter(|w| w.starts_with(scale_initial)).collect();

	let tail = tails.choose(&mut rng).copied().unwrap_or("tail");
	let scale = scales.choose(&mut rng).copied().unwrap_or("scale");
	format!("{tail}-{scale}")
}
