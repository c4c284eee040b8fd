use std::io;
use std::sync::Arc;

use crate::PrexResult;

/// A logical line of input: its text after continuation joining, the name
/// of the file it came from, and the 1-indexed number of its first physical
/// line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
	pub text: String,
	pub file: Arc<str>,
	pub number: usize,
}

impl SourceLine {
	pub fn new(text: impl Into<String>, file: Arc<str>, number: usize) -> Self {
		Self {
			text: text.into(),
			file,
			number,
		}
	}

	/// Whether the line, after optional leading whitespace, starts with the
	/// directive prefix character.
	pub fn is_anchored(&self, delimiter: char) -> bool {
		self.text.trim_start().starts_with(delimiter)
	}

	/// Derive a new line at the same origin, used when a line is split or
	/// rewritten during recognition.
	pub fn derive(&self, text: impl Into<String>) -> Self {
		Self {
			text: text.into(),
			file: Arc::clone(&self.file),
			number: self.number,
		}
	}
}

/// Joins physical lines into logical lines by applying trailing-backslash
/// continuation. A `\` as the final character removes itself and the line
/// break, splicing the next physical line on directly.
///
/// A dangling backslash on the final line of the file is not an error: the
/// backslash is preserved and [`LogicalLines::dangling_continuation`]
/// reports the line number so the caller can raise a warning.
pub struct LogicalLines<I> {
	physical: I,
	file: Arc<str>,
	next_number: usize,
	dangling: Option<usize>,
}

impl<I> LogicalLines<I>
where
	I: Iterator<Item = io::Result<String>>,
{
	pub fn new(physical: I, file: Arc<str>) -> Self {
		Self {
			physical,
			file,
			next_number: 1,
			dangling: None,
		}
	}

	/// After the iterator is exhausted: the starting line number of a
	/// logical line whose continuation ran into end-of-file, if any.
	pub fn dangling_continuation(&self) -> Option<usize> {
		self.dangling
	}
}

impl<I> Iterator for LogicalLines<I>
where
	I: Iterator<Item = io::Result<String>>,
{
	type Item = PrexResult<SourceLine>;

	fn next(&mut self) -> Option<Self::Item> {
		let first = match self.physical.next()? {
			Ok(line) => line,
			Err(error) => return Some(Err(error.into())),
		};
		let number = self.next_number;
		self.next_number += 1;

		let mut text = first;
		while text.ends_with('\\') {
			match self.physical.next() {
				Some(Ok(continuation)) => {
					text.pop();
					text.push_str(&continuation);
					self.next_number += 1;
				}
				Some(Err(error)) => return Some(Err(error.into())),
				None => {
					// End of file mid-continuation: keep the backslash and
					// let the caller warn about it.
					self.dangling = Some(number);
					break;
				}
			}
		}

		Some(Ok(SourceLine::new(text, Arc::clone(&self.file), number)))
	}
}
