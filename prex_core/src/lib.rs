//! `prex_core` is the core library for the prex text preprocessor. Given a
//! root text file, a registry of additional files, and a set of directive
//! descriptors, it produces a transformed stream of output lines in which
//! conditional blocks are resolved, loops are unrolled, includes and
//! imports are inlined, defined constants are substituted, and trailing
//! backslash continuations are joined.
//!
//! ## Processing Pipeline
//!
//! ```text
//! Input file
//!   → Line reader (joins physical lines into logical lines)
//!   → Recognizer (classifies lines into content and directive calls)
//!   → Block assembler (groups calls into a nested block tree)
//!   → Expander (walks the tree under a forkable context,
//!               yielding output lines lazily)
//! ```
//!
//! ## Modules
//!
//! - [`config`] — Options fixed at construction: the directive prefix,
//!   implicit substitution, and the substitution depth cap.
//! - [`registry`] — The file registry backing `include` and `import`.
//! - [`directive`] — Directive descriptors and the lockable registry.
//! - [`message`] — The sink that receives `info`/`warn` messages.
//!
//! ## Key Types
//!
//! - [`Prex`] — A configured preprocessor: registries plus entry points.
//! - [`Expander`] — The lazy output-line iterator.
//! - [`Node`] — A node of the assembled block tree.
//! - [`Value`] — A value in the expression mini-language.
//! - [`PrexError`] — Everything that can go wrong, with origin info.
//!
//! ## Quick Start
//!
//! ```rust
//! use prex_core::Prex;
//! use prex_core::PrexOptions;
//!
//! let mut prex = Prex::new(PrexOptions::default()).unwrap();
//! prex.register_source("top.txt", "#define NAME world\nhello $(NAME)\n")
//! 	.unwrap();
//! let output = prex.expand_to_string("top.txt").unwrap();
//! assert_eq!(output, "hello world\n");
//! ```

pub use config::*;
pub use context::ContextArena;
pub use context::ContextId;
pub use context::DefineValue;
pub use directive::*;
pub use error::*;
pub use eval::EvalEnv;
pub use eval::Value;
pub use expand::Expander;
pub use lexer::Recognized;
pub use line::LogicalLines;
pub use line::SourceLine;
pub use message::*;
pub use parser::Branch;
pub use parser::BranchKind;
pub use parser::Node;
pub use registry::*;

pub mod config;
pub mod context;
pub mod directive;
mod error;
pub mod eval;
mod expand;
pub mod lexer;
pub mod line;
pub mod message;
pub mod parser;
pub mod registry;
mod subst;

#[cfg(test)]
mod __tests;

use std::path::PathBuf;

/// A configured preprocessor instance: options, the file and directive
/// registries, the message sink, and any predefined constants.
pub struct Prex {
	options: PrexOptions,
	files: FileRegistry,
	directives: DirectiveRegistry,
	sink: Box<dyn MessageSink>,
	predefines: Vec<(String, Option<String>)>,
}

impl Prex {
	/// Create a preprocessor with the built-in directive set and a sink
	/// that drops messages.
	pub fn new(options: PrexOptions) -> PrexResult<Self> {
		options.validate()?;
		Ok(Self {
			options,
			files: FileRegistry::new(),
			directives: DirectiveRegistry::with_builtins(),
			sink: Box::new(NullSink),
			predefines: Vec::new(),
		})
	}

	/// Replace the message sink.
	pub fn with_sink(mut self, sink: impl MessageSink + 'static) -> Self {
		self.sink = Box::new(sink);
		self
	}

	/// Register a file on disk under its file name.
	pub fn register_file(&mut self, path: impl Into<PathBuf>) -> PrexResult<()> {
		self.files.register_path(path)
	}

	/// Register an in-memory source under a logical name.
	pub fn register_source(
		&mut self,
		name: impl Into<String>,
		contents: impl Into<String>,
	) -> PrexResult<()> {
		self.files.register_memory(name, contents)
	}

	/// Append a directory searched when resolving includes.
	pub fn add_search_root(&mut self, dir: impl Into<PathBuf>) {
		self.files.add_search_root(dir);
	}

	/// Predefine a constant in the root context of every expansion. A
	/// `None` value behaves like a bare `#define NAME`.
	pub fn predefine(&mut self, name: impl Into<String>, value: Option<String>) {
		self.predefines.push((name.into(), value));
	}

	/// Register an additional directive. Fails once an expansion has
	/// locked the registry.
	pub fn register_directive(&mut self, descriptor: DirectiveDescriptor) -> PrexResult<()> {
		self.directives.register(descriptor)
	}

	pub fn files(&self) -> &FileRegistry {
		&self.files
	}

	/// Expand a registered file into a lazy stream of output lines.
	pub fn expand(&mut self, name: &str) -> PrexResult<Expander<'_>> {
		self.directives.lock();
		let key = self.files.resolve(name, None)?;
		Expander::new(
			self.options.clone(),
			&mut self.files,
			&self.directives,
			self.sink.as_mut(),
			&self.predefines,
			&key,
		)
	}

	/// Expand a registered file eagerly, joining the lines with `\n` and
	/// ending with a trailing newline when there is any output.
	pub fn expand_to_string(&mut self, name: &str) -> PrexResult<String> {
		let mut output = String::new();
		for line in self.expand(name)? {
			output.push_str(&line?);
			output.push('\n');
		}
		Ok(output)
	}
}
