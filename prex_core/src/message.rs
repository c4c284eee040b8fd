use std::sync::Arc;

/// Severity of a non-fatal message emitted during expansion.
///
/// `error`-class directives never reach the sink; they abort expansion with
/// [`PrexError::UserError`](crate::PrexError::UserError) instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
	Info,
	Warning,
}

/// A message handed to the sink by the core, with its origin when known.
#[derive(Debug, Clone)]
pub struct Message {
	pub level: MessageLevel,
	pub text: String,
	pub file: Option<Arc<str>>,
	pub line: Option<usize>,
}

impl Message {
	pub fn new(level: MessageLevel, text: impl Into<String>) -> Self {
		Self {
			level,
			text: text.into(),
			file: None,
			line: None,
		}
	}

	pub fn at(mut self, file: Arc<str>, line: usize) -> Self {
		self.file = Some(file);
		self.line = Some(line);
		self
	}
}

/// Receiver for `info`/`warn` directives and internal warnings (redefined
/// values, dangling continuations). The core never prints; whoever drives
/// the expansion decides what to do with messages.
pub trait MessageSink {
	fn emit(&mut self, message: Message);
}

/// A sink that stores every message, used in tests and embeddings.
#[derive(Debug, Default)]
pub struct CollectSink {
	pub messages: Vec<Message>,
}

impl MessageSink for CollectSink {
	fn emit(&mut self, message: Message) {
		self.messages.push(message);
	}
}

/// A sink that drops every message.
#[derive(Debug, Default)]
pub struct NullSink;

impl MessageSink for NullSink {
	fn emit(&mut self, _message: Message) {}
}
