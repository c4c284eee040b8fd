use std::path::PathBuf;

use clap::Parser;

/// Command line surface for the `prex` preprocessor.
///
/// Input files are expanded in order and written to standard output (or
/// `--output`). `info` and `warn` messages go to standard error; any error
/// stops expansion with a non-zero exit code.
#[derive(Parser)]
#[command(
	author,
	version,
	about = "Expand text files through a general purpose preprocessor.",
	long_about = "prex is a general purpose, block oriented text preprocessor.\n\nIt resolves \
	              conditional blocks (#if/#elif/#else/#endif, #ifdef, #ifndef), unrolls \
	              #for loops, inlines #include and #import, substitutes defined constants \
	              both explicitly ($(NAME)) and implicitly (bare words), and joins trailing \
	              backslash line continuations.\n\nQuick start:\n  prex top.txt              \
	              Expand a file to stdout\n  prex -p inc/ top.txt      Resolve includes \
	              against a search root\n  prex -D DEBUG top.txt     Predefine a constant"
)]
pub struct PrexCli {
	/// Input files to expand, in order.
	#[arg(required = true)]
	pub files: Vec<PathBuf>,

	/// Directory to search when resolving includes. May be repeated;
	/// directories are searched in the order given.
	#[arg(long, short = 'p', value_name = "DIR")]
	pub path: Vec<PathBuf>,

	/// The directive prefix character.
	#[arg(long, short = 'd', default_value_t = '#')]
	pub delimiter: char,

	/// Predefine a constant, as NAME or NAME=VALUE. May be repeated.
	#[arg(long = "define", short = 'D', value_name = "NAME[=VALUE]")]
	pub defines: Vec<String>,

	/// Disable implicit substitution of bare identifiers; only $(NAME)
	/// forms are replaced.
	#[arg(long, default_value_t = false)]
	pub no_implicit: bool,

	/// Write output to a file instead of standard output.
	#[arg(long, short = 'o', value_name = "FILE")]
	pub output: Option<PathBuf>,

	/// Disable colored diagnostics.
	#[arg(long, global = true, default_value_t = false)]
	pub no_color: bool,

	/// Echo info messages to standard error as well as warnings.
	#[arg(long, short = 'v', default_value_t = false)]
	pub verbose: bool,
}

/// A parsed `-D` argument: `NAME` alone or `NAME=VALUE`.
pub fn split_define(argument: &str) -> (String, Option<String>) {
	match argument.split_once('=') {
		Some((name, value)) => (name.to_string(), Some(value.to_string())),
		None => (argument.to_string(), None),
	}
}
