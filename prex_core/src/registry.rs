use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use crate::PrexError;
use crate::PrexResult;

/// Where the bytes of a registered file live.
#[derive(Debug, Clone)]
pub enum FileSource {
	/// A file on disk, re-opened each time it is expanded.
	Path(PathBuf),
	/// An in-memory buffer, for programmatic use and tests.
	Memory(String),
}

/// A registry entry: the logical name callers refer to, the source, and
/// the one-shot `import` flag.
#[derive(Debug, Clone)]
pub struct FileEntry {
	pub name: Arc<str>,
	pub source: FileSource,
	imported: bool,
}

impl FileEntry {
	fn new(name: Arc<str>, source: FileSource) -> Self {
		Self {
			name,
			source,
			imported: false,
		}
	}

	/// The directory the entry's path lives in, used to resolve includes
	/// relative to the including file.
	pub fn origin_dir(&self) -> Option<PathBuf> {
		match &self.source {
			FileSource::Path(path) => path.parent().map(Path::to_path_buf),
			FileSource::Memory(_) => None,
		}
	}
}

/// Keeps track of every file available to `include` and `import`.
///
/// Lookup order in [`resolve`](FileRegistry::resolve) is fixed: an exact
/// registered name wins, then a path relative to the requesting file's
/// directory, then each search root in registration order. Files found on
/// disk during resolution are cached as registry entries so a later
/// `import` of the same file dedupes correctly.
#[derive(Debug, Default)]
pub struct FileRegistry {
	entries: HashMap<String, FileEntry>,
	search_roots: Vec<PathBuf>,
	allow_override: bool,
}

impl FileRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Allow re-registration of an existing logical name instead of
	/// failing with `DuplicateRegistration`.
	pub fn allow_override(&mut self, allow: bool) {
		self.allow_override = allow;
	}

	/// Register a file on disk under its file name.
	pub fn register_path(&mut self, path: impl Into<PathBuf>) -> PrexResult<()> {
		let path = path.into();
		if !path.is_file() {
			return Err(PrexError::FileNotFound {
				name: path.display().to_string(),
			});
		}
		let name = path
			.file_name()
			.map(|name| name.to_string_lossy().into_owned())
			.ok_or_else(|| {
				PrexError::FileNotFound {
					name: path.display().to_string(),
				}
			})?;
		self.insert(name, FileSource::Path(path))
	}

	/// Register an in-memory buffer under a logical name.
	pub fn register_memory(
		&mut self,
		name: impl Into<String>,
		contents: impl Into<String>,
	) -> PrexResult<()> {
		self.insert(name.into(), FileSource::Memory(contents.into()))
	}

	fn insert(&mut self, name: String, source: FileSource) -> PrexResult<()> {
		if self.entries.contains_key(&name) && !self.allow_override {
			return Err(PrexError::DuplicateRegistration { name });
		}
		let entry = FileEntry::new(Arc::from(name.as_str()), source);
		self.entries.insert(name, entry);
		Ok(())
	}

	/// Append a directory searched by `resolve`. Roots are consulted in the
	/// order they were added.
	pub fn add_search_root(&mut self, dir: impl Into<PathBuf>) {
		self.search_roots.push(dir.into());
	}

	/// Resolve a requested name to the logical key of a registry entry,
	/// caching disk hits along the way.
	pub fn resolve(&mut self, name: &str, origin_dir: Option<&Path>) -> PrexResult<String> {
		let name = name.trim();
		if self.entries.contains_key(name) {
			return Ok(name.to_string());
		}

		let requested = Path::new(name);
		if requested.is_absolute() && requested.is_file() {
			return self.cache_path(requested.to_path_buf());
		}

		if let Some(dir) = origin_dir {
			let candidate = dir.join(name);
			if candidate.is_file() {
				return self.cache_path(candidate);
			}
		}

		for root in &self.search_roots {
			let candidate = root.join(name);
			if candidate.is_file() {
				return self.cache_path(candidate);
			}
		}

		Err(PrexError::FileNotFound {
			name: name.to_string(),
		})
	}

	/// Cache a path discovered during resolution, keyed by its canonical
	/// path so the same file reached through different routes shares one
	/// entry (and one `import` flag).
	fn cache_path(&mut self, path: PathBuf) -> PrexResult<String> {
		let canonical = path.canonicalize().unwrap_or(path);
		let key = canonical.display().to_string();
		if !self.entries.contains_key(&key) {
			let entry = FileEntry::new(Arc::from(key.as_str()), FileSource::Path(canonical));
			self.entries.insert(key.clone(), entry);
		}
		Ok(key)
	}

	pub fn entry(&self, key: &str) -> Option<&FileEntry> {
		self.entries.get(key)
	}

	/// Open a resolved entry as an iterator of physical lines. Disk files
	/// are opened here, on first use, and closed when the iterator drops.
	pub fn open(&self, key: &str) -> PrexResult<FileLines> {
		let entry = self.entries.get(key).ok_or_else(|| {
			PrexError::FileNotFound {
				name: key.to_string(),
			}
		})?;
		match &entry.source {
			FileSource::Path(path) => {
				let reader = BufReader::new(File::open(path)?);
				Ok(FileLines::Disk(reader.lines()))
			}
			FileSource::Memory(contents) => {
				let lines: Vec<String> = contents.lines().map(str::to_string).collect();
				Ok(FileLines::Memory(lines.into_iter()))
			}
		}
	}

	pub fn mark_imported(&mut self, key: &str) {
		if let Some(entry) = self.entries.get_mut(key) {
			entry.imported = true;
		}
	}

	pub fn was_imported(&self, key: &str) -> bool {
		self.entries.get(key).is_some_and(|entry| entry.imported)
	}
}

/// Physical-line iterator over a registry entry.
pub enum FileLines {
	Disk(io::Lines<BufReader<File>>),
	Memory(std::vec::IntoIter<String>),
}

impl Iterator for FileLines {
	type Item = io::Result<String>;

	fn next(&mut self) -> Option<Self::Item> {
		match self {
			Self::Disk(lines) => lines.next(),
			Self::Memory(lines) => lines.next().map(Ok),
		}
	}
}
