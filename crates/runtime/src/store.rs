//! Macro and file lookups behind `loadmacro` and `loadfile`.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A stored G-code snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Macro {
	pub id: String,
	pub name: String,
	pub content: String,
}

#[async_trait]
pub trait MacroStore: Send + Sync {
	async fn lookup_macro(&self, id: &str) -> Result<Option<Macro>>;
}

#[async_trait]
pub trait FileStore: Send + Sync {
	async fn read_file(&self, path: &str) -> Result<String>;
}

/// Fixed set of macros, usually from the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticMacroStore {
	macros: HashMap<String, Macro>,
}

impl StaticMacroStore {
	pub fn new(macros: impl IntoIterator<Item = Macro>) -> Self {
		Self {
			macros: macros.into_iter().map(|m| (m.id.clone(), m)).collect(),
		}
	}

	pub fn len(&self) -> usize {
		self.macros.len()
	}

	pub fn is_empty(&self) -> bool {
		self.macros.is_empty()
	}
}

#[async_trait]
impl MacroStore for StaticMacroStore {
	async fn lookup_macro(&self, id: &str) -> Result<Option<Macro>> {
		Ok(self.macros.get(id).cloned())
	}
}

/// Reads program files below a watch directory.
#[derive(Debug, Clone)]
pub struct FsFileStore {
	root: PathBuf,
}

impl FsFileStore {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Joins `path` onto the root. Absolute paths and `..` are refused.
	pub fn resolve(&self, path: &str) -> Result<PathBuf> {
		let relative = Path::new(path);
		let escapes = relative
			.components()
			.any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
		if path.is_empty() || escapes {
			return Err(Error::InvalidArgument {
				command: "loadfile",
				reason: format!("path must stay inside the watch directory: {path}"),
			});
		}
		Ok(self.root.join(relative))
	}
}

#[async_trait]
impl FileStore for FsFileStore {
	async fn read_file(&self, path: &str) -> Result<String> {
		let full = self.resolve(path)?;
		Ok(tokio::fs::read_to_string(full).await?)
	}
}

/// Store with nothing in it.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyStore;

#[async_trait]
impl MacroStore for EmptyStore {
	async fn lookup_macro(&self, _id: &str) -> Result<Option<Macro>> {
		Ok(None)
	}
}

#[async_trait]
impl FileStore for EmptyStore {
	async fn read_file(&self, path: &str) -> Result<String> {
		Err(Error::Io(std::io::Error::new(
			std::io::ErrorKind::NotFound,
			format!("no file store configured: {path}"),
		)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn static_store_finds_by_id() {
		let store = StaticMacroStore::new([Macro {
			id: "m1".into(),
			name: "Probe".into(),
			content: "G38.2 Z-10 F50".into(),
		}]);

		let found = store.lookup_macro("m1").await.unwrap().unwrap();
		assert_eq!(found.name, "Probe");
		assert!(store.lookup_macro("m2").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn fs_store_reads_inside_root() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::create_dir(dir.path().join("jobs")).unwrap();
		std::fs::write(dir.path().join("jobs/part.nc"), "G0 X0\nG1 X10\n").unwrap();

		let store = FsFileStore::new(dir.path());
		let content = store.read_file("jobs/part.nc").await.unwrap();
		assert_eq!(content, "G0 X0\nG1 X10\n");
		assert!(store.read_file("./jobs/part.nc").await.is_ok());
	}

	#[tokio::test]
	async fn fs_store_refuses_escapes() {
		let dir = tempfile::tempdir().unwrap();
		let store = FsFileStore::new(dir.path());

		for path in ["../secret.nc", "/etc/passwd", "jobs/../../x.nc", ""] {
			let err = store.read_file(path).await.unwrap_err();
			assert!(err.is_caller_error(), "{path}: {err}");
		}
	}

	#[tokio::test]
	async fn fs_store_missing_file_is_io_error() {
		let dir = tempfile::tempdir().unwrap();
		let store = FsFileStore::new(dir.path());
		let err = store.read_file("missing.nc").await.unwrap_err();
		assert!(matches!(err, Error::Io(_)));
	}
}
