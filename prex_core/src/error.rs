use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum PrexError {
	#[error(transparent)]
	#[diagnostic(code(prex::io_error))]
	Io(#[from] std::io::Error),

	#[error("no file found for `{name}`")]
	#[diagnostic(
		code(prex::file_not_found),
		help("register the file, or add a search root that contains it")
	)]
	FileNotFound { name: String },

	#[error("`{name}` is already registered")]
	#[diagnostic(code(prex::duplicate_registration))]
	DuplicateRegistration { name: String },

	#[error("cannot register `{tag}`: the directive registry is locked")]
	#[diagnostic(
		code(prex::registry_locked),
		help("register custom directives before expansion begins")
	)]
	RegistryLocked { tag: String },

	#[error("unknown directive `{tag}`")]
	#[diagnostic(code(prex::unknown_directive))]
	UnknownDirective { tag: String },

	#[error("misplaced `{tag}` at {file}:{line}: {detail}")]
	#[diagnostic(
		code(prex::block_mismatch),
		help("transitions and closers must match the innermost open block")
	)]
	BlockMismatch {
		tag: String,
		detail: String,
		file: Arc<str>,
		line: usize,
	},

	#[error("`{tag}` block opened at {file}:{line} is never closed")]
	#[diagnostic(code(prex::unterminated_block))]
	UnterminatedBlock {
		tag: String,
		file: Arc<str>,
		line: usize,
	},

	#[error("`{name}` is not defined at {file}:{line}")]
	#[diagnostic(code(prex::undefined_identifier))]
	UndefinedIdentifier {
		name: String,
		file: Arc<str>,
		line: usize,
	},

	#[error("substitution exceeded {limit} levels at {file}:{line}")]
	#[diagnostic(
		code(prex::substitution_loop),
		help("a define most likely refers to itself, directly or via another define")
	)]
	SubstitutionLoop {
		limit: usize,
		file: Arc<str>,
		line: usize,
	},

	#[error("invalid expression at {file}:{line}: {detail}")]
	#[diagnostic(code(prex::expression_syntax))]
	ExpressionSyntax {
		detail: String,
		file: Arc<str>,
		line: usize,
	},

	#[error("type mismatch at {file}:{line}: {detail}")]
	#[diagnostic(code(prex::type_mismatch))]
	TypeMismatch {
		detail: String,
		file: Arc<str>,
		line: usize,
	},

	#[error("{message} ({file}:{line})")]
	#[diagnostic(code(prex::user_error))]
	UserError {
		message: String,
		file: Arc<str>,
		line: usize,
	},

	#[error("recursive inclusion of `{name}`")]
	#[diagnostic(
		code(prex::recursive_include),
		help("a file cannot include itself, directly or through other files")
	)]
	RecursiveInclude { name: String },

	#[error("delimiter must be a single non-whitespace character, got {0:?}")]
	#[diagnostic(code(prex::invalid_delimiter))]
	InvalidDelimiter(char),
}

pub type PrexResult<T> = Result<T, PrexError>;
pub type AnyError = Box<dyn std::error::Error>;
pub type AnyEmptyResult = Result<(), AnyError>;
pub type AnyResult<T> = Result<T, AnyError>;
