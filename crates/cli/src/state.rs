//! Engine state kept as one file per key under a directory.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use tracing::debug;
use tsbridge::{StateError, StateStore};

pub struct DirStateStore {
	root: PathBuf,
}

impl DirStateStore {
	/// Creates `root` if needed.
	pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
		let root = root.into();
		fs::create_dir_all(&root)?;
		Ok(Self { root })
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	fn path(&self, key: &str) -> Result<PathBuf, StateError> {
		let plain = !key.is_empty() && key != "." && key != ".." && !key.contains(['/', '\\']);
		if !plain {
			return Err(io::Error::new(ErrorKind::InvalidInput, format!("state key {key:?} is not a file name")).into());
		}
		Ok(self.root.join(key))
	}
}

impl StateStore for DirStateStore {
	fn read_state(&self, key: &str) -> Result<Vec<u8>, StateError> {
		match fs::read(self.path(key)?) {
			Ok(bytes) => Ok(bytes),
			Err(err) if err.kind() == ErrorKind::NotFound => Err(StateError::NotFound(key.to_string())),
			Err(err) => Err(err.into()),
		}
	}

	fn write_state(&self, key: &str, value: &[u8]) -> Result<(), StateError> {
		let path = self.path(key)?;
		let tmp = self.root.join(format!("{key}.tmp"));
		fs::write(&tmp, value)?;
		fs::rename(&tmp, &path)?;
		debug!(target = "tsbridge_cli", key, bytes = value.len(), "state saved");
		Ok(())
	}
}
