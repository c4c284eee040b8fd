use std::fs::File;
use std::io::BufWriter;
use std::io::Write;
use std::process;

use clap::Parser;
use owo_colors::OwoColorize;
use prex_cli::PrexCli;
use prex_cli::split_define;
use prex_core::Message;
use prex_core::MessageLevel;
use prex_core::MessageSink;
use prex_core::Prex;
use prex_core::PrexError;
use prex_core::PrexOptions;

/// Prints `info`/`warn` messages from the core to standard error.
struct StderrSink {
	color: bool,
	verbose: bool,
}

impl MessageSink for StderrSink {
	fn emit(&mut self, message: Message) {
		let label = match message.level {
			MessageLevel::Info => {
				if !self.verbose {
					return;
				}
				if self.color {
					format!("{}", "info:".green())
				} else {
					"info:".to_string()
				}
			}
			MessageLevel::Warning => {
				if self.color {
					format!("{}", "warning:".yellow())
				} else {
					"warning:".to_string()
				}
			}
		};

		match (&message.file, message.line) {
			(Some(file), Some(line)) => {
				eprintln!("{label} {} ({file}:{line})", message.text);
			}
			_ => eprintln!("{label} {}", message.text),
		}
	}
}

fn main() {
	let args = PrexCli::parse();

	// Respect NO_COLOR env var and --no-color flag.
	let use_color = !args.no_color && std::env::var_os("NO_COLOR").is_none();

	// Install miette's fancy handler for rich error diagnostics.
	miette::set_hook(Box::new(move |_| {
		Box::new(
			miette::MietteHandlerOpts::new()
				.color(use_color)
				.unicode(use_color)
				.build(),
		)
	}))
	.ok();

	if let Err(error) = run(&args, use_color) {
		let report: miette::Report = error.into();
		eprintln!("{report:?}");
		process::exit(2);
	}
}

fn run(args: &PrexCli, use_color: bool) -> Result<(), PrexError> {
	let options = PrexOptions {
		delimiter: args.delimiter,
		implicit_substitution: !args.no_implicit,
		..PrexOptions::default()
	};

	let mut prex = Prex::new(options)?.with_sink(StderrSink {
		color: use_color,
		verbose: args.verbose,
	});

	for root in &args.path {
		prex.add_search_root(root);
	}
	for define in &args.defines {
		let (name, value) = split_define(define);
		prex.predefine(name, value);
	}

	let mut names = Vec::with_capacity(args.files.len());
	for file in &args.files {
		prex.register_file(file)?;
		let name = file
			.file_name()
			.map(|name| name.to_string_lossy().into_owned())
			.unwrap_or_else(|| file.display().to_string());
		names.push(name);
	}

	let mut writer: Box<dyn Write> = match &args.output {
		Some(path) => Box::new(BufWriter::new(File::create(path)?)),
		None => Box::new(BufWriter::new(std::io::stdout().lock())),
	};

	for name in &names {
		for line in prex.expand(name)? {
			writeln!(writer, "{}", line?)?;
		}
	}
	writer.flush()?;

	Ok(())
}
