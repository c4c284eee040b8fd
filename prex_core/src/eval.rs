use std::fmt;
use std::fmt::Display;
use std::sync::Arc;

use logos::Logos;
use snailquote::unescape;

use crate::PrexError;
use crate::PrexResult;
use crate::context::ContextArena;
use crate::context::ContextId;
use crate::context::DefineValue;

/// Raw tokens of the expression mini-language.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n]+")]
enum Token {
	#[token("(")]
	LParen,
	#[token(")")]
	RParen,
	#[token("[")]
	LBracket,
	#[token("]")]
	RBracket,
	#[token(",")]
	Comma,
	#[token("+")]
	Plus,
	#[token("-")]
	Minus,
	#[token("*")]
	Star,
	#[token("/")]
	Slash,
	#[token("%")]
	Percent,
	#[token("==")]
	EqEq,
	#[token("!=")]
	NotEq,
	#[token("<=")]
	LtEq,
	#[token(">=")]
	GtEq,
	#[token("<")]
	Lt,
	#[token(">")]
	Gt,
	#[token("and")]
	#[token("&&")]
	And,
	#[token("or")]
	#[token("||")]
	Or,
	#[token("not")]
	#[token("!")]
	Not,
	#[token("in")]
	In,
	#[token("true")]
	#[token("True")]
	True,
	#[token("false")]
	#[token("False")]
	False,
	#[regex(r"[0-9]+")]
	Int,
	#[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
	Ident,
	#[regex(r#""([^"\\]|\\.)*""#)]
	DoubleQuotedString,
	#[regex(r"'([^'\\]|\\.)*'")]
	SingleQuotedString,
}

/// A typed expression tree. Produced by the Pratt parser, consumed by the
/// evaluator; never delegated to a host-language eval.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
	Int(i64),
	Str(String),
	Bool(bool),
	List(Vec<Expr>),
	Ident(String),
	/// `defined(NAME)` definedness guard.
	Defined(String),
	/// `range(stop)` / `range(start, stop)` / `range(start, stop, step)`.
	Range(Vec<Expr>),
	Unary {
		op: UnaryOp,
		operand: Box<Expr>,
	},
	Binary {
		op: BinaryOp,
		lhs: Box<Expr>,
		rhs: Box<Expr>,
	},
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
	Neg,
	Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
	Add,
	Sub,
	Mul,
	Div,
	Rem,
	Eq,
	Ne,
	Lt,
	Le,
	Gt,
	Ge,
	And,
	Or,
	In,
}

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
	Int(i64),
	Bool(bool),
	Str(String),
	List(Vec<Value>),
}

impl Value {
	/// Truthiness for conditional gating: zero, false, and empty values
	/// are falsy.
	pub fn truthy(&self) -> bool {
		match self {
			Self::Int(value) => *value != 0,
			Self::Bool(value) => *value,
			Self::Str(value) => !value.is_empty(),
			Self::List(values) => !values.is_empty(),
		}
	}

	fn type_name(&self) -> &'static str {
		match self {
			Self::Int(_) => "integer",
			Self::Bool(_) => "boolean",
			Self::Str(_) => "string",
			Self::List(_) => "list",
		}
	}
}

impl Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Int(value) => write!(f, "{value}"),
			Self::Bool(value) => write!(f, "{value}"),
			Self::Str(value) => write!(f, "{value}"),
			Self::List(values) => {
				write!(f, "[")?;
				for (index, value) in values.iter().enumerate() {
					if index > 0 {
						write!(f, ", ")?;
					}
					write!(f, "{value}")?;
				}
				write!(f, "]")
			}
		}
	}
}

/// Everything evaluation needs: the context to resolve identifiers in, the
/// origin for error reporting, and the recursion cap shared with textual
/// substitution.
pub struct EvalEnv<'a> {
	pub arena: &'a ContextArena,
	pub ctx: ContextId,
	pub file: Arc<str>,
	pub line: usize,
	pub limit: usize,
}

impl EvalEnv<'_> {
	fn syntax(&self, detail: impl Into<String>) -> PrexError {
		PrexError::ExpressionSyntax {
			detail: detail.into(),
			file: Arc::clone(&self.file),
			line: self.line,
		}
	}

	fn mismatch(&self, detail: impl Into<String>) -> PrexError {
		PrexError::TypeMismatch {
			detail: detail.into(),
			file: Arc::clone(&self.file),
			line: self.line,
		}
	}
}

/// Parse and evaluate an expression against a context.
pub fn evaluate(text: &str, env: &EvalEnv<'_>) -> PrexResult<Value> {
	evaluate_at_depth(text, env, 0)
}

fn evaluate_at_depth(text: &str, env: &EvalEnv<'_>, depth: usize) -> PrexResult<Value> {
	if depth >= env.limit {
		return Err(PrexError::SubstitutionLoop {
			limit: env.limit,
			file: Arc::clone(&env.file),
			line: env.line,
		});
	}
	let expr = parse(text).map_err(|detail| env.syntax(detail))?;
	eval_expr(&expr, env, depth)
}

/// Parse an expression without evaluating it. Exposed so substitution can
/// decide whether define text is an expression or plain prose.
pub(crate) fn parse(text: &str) -> Result<Expr, String> {
	let tokens = tokenize(text)?;
	if tokens.is_empty() {
		return Err("empty expression".to_string());
	}
	let mut parser = Parser { tokens, pos: 0 };
	let expr = parser.parse_expr(0)?;
	if parser.pos < parser.tokens.len() {
		return Err(format!(
			"unexpected `{}` after the expression",
			parser.tokens[parser.pos].1
		));
	}
	Ok(expr)
}

fn tokenize(text: &str) -> Result<Vec<(Token, String)>, String> {
	let mut tokens = Vec::new();
	for (result, span) in Token::lexer(text).spanned() {
		let slice = text[span].to_string();
		match result {
			Ok(token) => tokens.push((token, slice)),
			Err(()) => return Err(format!("unrecognized character `{slice}`")),
		}
	}
	Ok(tokens)
}

/// Split a loop header (without its trailing `:`) into loop variables and
/// the iterable expression text.
pub(crate) fn split_loop_header(header: &str) -> Result<(Vec<String>, String), String> {
	let mut variables = Vec::new();
	let mut expect_ident = true;
	for (result, span) in Token::lexer(header).spanned() {
		match result {
			Ok(Token::Ident) if expect_ident => {
				variables.push(header[span].to_string());
				expect_ident = false;
			}
			Ok(Token::Comma) if !expect_ident => {
				expect_ident = true;
			}
			Ok(Token::In) if !expect_ident && !variables.is_empty() => {
				let expr = header[span.end..].trim().to_string();
				if expr.is_empty() {
					return Err("missing iterable after `in`".to_string());
				}
				return Ok((variables, expr));
			}
			_ => {
				return Err(format!(
					"expected `VAR in EXPR` or `VAR1, VAR2 in EXPR`, got `{header}`"
				));
			}
		}
	}
	Err(format!("missing `in` in loop header `{header}`"))
}

struct Parser {
	tokens: Vec<(Token, String)>,
	pos: usize,
}

// Binding powers, higher binds tighter. Left/right pairs make every infix
// operator left-associative.
const BP_OR: (u8, u8) = (1, 2);
const BP_AND: (u8, u8) = (3, 4);
const BP_NOT: u8 = 5;
const BP_COMPARE: (u8, u8) = (7, 8);
const BP_TERM: (u8, u8) = (9, 10);
const BP_FACTOR: (u8, u8) = (11, 12);
const BP_NEG: u8 = 13;

fn infix_bp(token: Token) -> Option<(u8, u8, BinaryOp)> {
	let (bp, op) = match token {
		Token::Or => (BP_OR, BinaryOp::Or),
		Token::And => (BP_AND, BinaryOp::And),
		Token::EqEq => (BP_COMPARE, BinaryOp::Eq),
		Token::NotEq => (BP_COMPARE, BinaryOp::Ne),
		Token::Lt => (BP_COMPARE, BinaryOp::Lt),
		Token::LtEq => (BP_COMPARE, BinaryOp::Le),
		Token::Gt => (BP_COMPARE, BinaryOp::Gt),
		Token::GtEq => (BP_COMPARE, BinaryOp::Ge),
		Token::In => (BP_COMPARE, BinaryOp::In),
		Token::Plus => (BP_TERM, BinaryOp::Add),
		Token::Minus => (BP_TERM, BinaryOp::Sub),
		Token::Star => (BP_FACTOR, BinaryOp::Mul),
		Token::Slash => (BP_FACTOR, BinaryOp::Div),
		Token::Percent => (BP_FACTOR, BinaryOp::Rem),
		_ => return None,
	};
	Some((bp.0, bp.1, op))
}

impl Parser {
	fn peek(&self) -> Option<Token> {
		self.tokens.get(self.pos).map(|(token, _)| *token)
	}

	fn advance(&mut self) -> Option<(Token, &str)> {
		let entry = self.tokens.get(self.pos)?;
		self.pos += 1;
		Some((entry.0, entry.1.as_str()))
	}

	fn expect(&mut self, token: Token, what: &str) -> Result<(), String> {
		match self.advance() {
			Some((found, _)) if found == token => Ok(()),
			Some((_, slice)) => Err(format!("expected {what}, got `{slice}`")),
			None => Err(format!("expected {what}, got end of expression")),
		}
	}

	fn parse_expr(&mut self, min_bp: u8) -> Result<Expr, String> {
		let mut lhs = self.parse_prefix()?;

		while let Some(token) = self.peek() {
			let Some((left_bp, right_bp, op)) = infix_bp(token) else {
				break;
			};
			if left_bp < min_bp {
				break;
			}
			self.advance();
			let rhs = self.parse_expr(right_bp)?;
			lhs = Expr::Binary {
				op,
				lhs: Box::new(lhs),
				rhs: Box::new(rhs),
			};
		}

		Ok(lhs)
	}

	fn parse_prefix(&mut self) -> Result<Expr, String> {
		let Some((token, slice)) = self.advance() else {
			return Err("unexpected end of expression".to_string());
		};
		let slice = slice.to_string();

		match token {
			Token::Int => {
				slice
					.parse::<i64>()
					.map(Expr::Int)
					.map_err(|_| format!("integer literal `{slice}` is out of range"))
			}
			Token::True => Ok(Expr::Bool(true)),
			Token::False => Ok(Expr::Bool(false)),
			Token::DoubleQuotedString | Token::SingleQuotedString => {
				let inner = &slice[1..slice.len() - 1];
				let value = if inner.contains('\\') {
					unescape(&slice).map_err(|_| format!("invalid escape in {slice}"))?
				} else {
					inner.to_string()
				};
				Ok(Expr::Str(value))
			}
			Token::Ident => self.parse_ident(slice),
			Token::Minus => {
				let operand = self.parse_expr(BP_NEG)?;
				Ok(Expr::Unary {
					op: UnaryOp::Neg,
					operand: Box::new(operand),
				})
			}
			Token::Not => {
				let operand = self.parse_expr(BP_NOT)?;
				Ok(Expr::Unary {
					op: UnaryOp::Not,
					operand: Box::new(operand),
				})
			}
			Token::LParen => {
				let inner = self.parse_expr(0)?;
				self.expect(Token::RParen, "`)`")?;
				Ok(inner)
			}
			Token::LBracket => {
				let mut items = Vec::new();
				if self.peek() == Some(Token::RBracket) {
					self.advance();
					return Ok(Expr::List(items));
				}
				loop {
					items.push(self.parse_expr(0)?);
					match self.advance() {
						Some((Token::Comma, _)) => continue,
						Some((Token::RBracket, _)) => break,
						Some((_, slice)) => {
							return Err(format!("expected `,` or `]`, got `{slice}`"));
						}
						None => return Err("unterminated list literal".to_string()),
					}
				}
				Ok(Expr::List(items))
			}
			_ => Err(format!("unexpected `{slice}`")),
		}
	}

	/// An identifier is either a bare reference or one of the two built-in
	/// function forms, `range(...)` and `defined(NAME)`.
	fn parse_ident(&mut self, name: String) -> Result<Expr, String> {
		if self.peek() != Some(Token::LParen) {
			return Ok(Expr::Ident(name));
		}

		match name.as_str() {
			"range" => {
				self.advance();
				let mut args = Vec::new();
				loop {
					args.push(self.parse_expr(0)?);
					match self.advance() {
						Some((Token::Comma, _)) => continue,
						Some((Token::RParen, _)) => break,
						Some((_, slice)) => {
							return Err(format!("expected `,` or `)`, got `{slice}`"));
						}
						None => return Err("unterminated `range(...)`".to_string()),
					}
				}
				if args.is_empty() || args.len() > 3 {
					return Err(format!(
						"range takes 1 to 3 arguments, got {}",
						args.len()
					));
				}
				Ok(Expr::Range(args))
			}
			"defined" => {
				self.advance();
				let argument = match self.advance() {
					Some((Token::Ident, slice)) => slice.to_string(),
					Some((_, slice)) => {
						return Err(format!("defined expects a name, got `{slice}`"));
					}
					None => return Err("unterminated `defined(...)`".to_string()),
				};
				self.expect(Token::RParen, "`)`")?;
				Ok(Expr::Defined(argument))
			}
			_ => Err(format!("unknown function `{name}`")),
		}
	}
}

fn eval_expr(expr: &Expr, env: &EvalEnv<'_>, depth: usize) -> PrexResult<Value> {
	match expr {
		Expr::Int(value) => Ok(Value::Int(*value)),
		Expr::Bool(value) => Ok(Value::Bool(*value)),
		Expr::Str(value) => Ok(Value::Str(value.clone())),
		Expr::List(items) => {
			let values = items
				.iter()
				.map(|item| eval_expr(item, env, depth))
				.collect::<PrexResult<Vec<_>>>()?;
			Ok(Value::List(values))
		}
		Expr::Ident(name) => resolve_ident(name, env, depth),
		Expr::Defined(name) => Ok(Value::Bool(env.arena.is_defined(env.ctx, name))),
		Expr::Range(args) => eval_range(args, env, depth),
		Expr::Unary { op, operand } => {
			let value = eval_expr(operand, env, depth)?;
			match op {
				UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
				UnaryOp::Neg => {
					match value {
						Value::Int(value) => Ok(Value::Int(-value)),
						other => {
							Err(env.mismatch(format!("cannot negate a {}", other.type_name())))
						}
					}
				}
			}
		}
		Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, env, depth),
	}
}

/// Resolve an identifier through the context. Define text is itself parsed
/// and evaluated (this is the recursive substitution the depth limit
/// guards); text that does not parse as an expression is treated as a
/// plain string value.
fn resolve_ident(name: &str, env: &EvalEnv<'_>, depth: usize) -> PrexResult<Value> {
	match env.arena.lookup(env.ctx, name) {
		None => Err(PrexError::UndefinedIdentifier {
			name: name.to_string(),
			file: Arc::clone(&env.file),
			line: env.line,
		}),
		Some(DefineValue::Marker) => Ok(Value::Bool(true)),
		Some(DefineValue::Resolved(value)) => Ok(value.clone()),
		Some(DefineValue::Text(raw)) => {
			match parse(raw) {
				Ok(_) => evaluate_at_depth(raw, env, depth + 1),
				Err(_) => Ok(Value::Str(raw.trim().to_string())),
			}
		}
	}
}

fn eval_range(args: &[Expr], env: &EvalEnv<'_>, depth: usize) -> PrexResult<Value> {
	let mut bounds = Vec::with_capacity(args.len());
	for arg in args {
		match eval_expr(arg, env, depth)? {
			Value::Int(value) => bounds.push(value),
			other => {
				return Err(env.mismatch(format!(
					"range expects integers, got a {}",
					other.type_name()
				)));
			}
		}
	}

	let (start, stop, step) = match bounds.as_slice() {
		[stop] => (0, *stop, 1),
		[start, stop] => (*start, *stop, 1),
		[start, stop, step] => (*start, *stop, *step),
		_ => unreachable!("the parser rejects other arities"),
	};
	if step == 0 {
		return Err(env.mismatch("range step must not be zero"));
	}

	let mut values = Vec::new();
	let mut current = start;
	while (step > 0 && current < stop) || (step < 0 && current > stop) {
		values.push(Value::Int(current));
		current += step;
	}
	Ok(Value::List(values))
}

fn eval_binary(
	op: BinaryOp,
	lhs: &Expr,
	rhs: &Expr,
	env: &EvalEnv<'_>,
	depth: usize,
) -> PrexResult<Value> {
	// Logical operators short-circuit; everything else is strict.
	if matches!(op, BinaryOp::And | BinaryOp::Or) {
		let left = eval_expr(lhs, env, depth)?.truthy();
		return match (op, left) {
			(BinaryOp::And, false) => Ok(Value::Bool(false)),
			(BinaryOp::Or, true) => Ok(Value::Bool(true)),
			_ => Ok(Value::Bool(eval_expr(rhs, env, depth)?.truthy())),
		};
	}

	let left = eval_expr(lhs, env, depth)?;
	let right = eval_expr(rhs, env, depth)?;

	match op {
		BinaryOp::Eq => Ok(Value::Bool(left == right)),
		BinaryOp::Ne => Ok(Value::Bool(left != right)),
		BinaryOp::Add => {
			match (left, right) {
				(Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
				(Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
				(a, b) => {
					Err(env.mismatch(format!(
						"cannot add {} and {}",
						a.type_name(),
						b.type_name()
					)))
				}
			}
		}
		BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
			let (a, b) = match (&left, &right) {
				(Value::Int(a), Value::Int(b)) => (*a, *b),
				(a, b) => {
					return Err(env.mismatch(format!(
						"arithmetic needs integers, got {} and {}",
						a.type_name(),
						b.type_name()
					)));
				}
			};
			match op {
				BinaryOp::Sub => Ok(Value::Int(a - b)),
				BinaryOp::Mul => Ok(Value::Int(a * b)),
				BinaryOp::Div if b == 0 => Err(env.mismatch("division by zero")),
				BinaryOp::Div => Ok(Value::Int(a / b)),
				BinaryOp::Rem if b == 0 => Err(env.mismatch("modulo by zero")),
				BinaryOp::Rem => Ok(Value::Int(a % b)),
				_ => unreachable!(),
			}
		}
		BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
			let ordering = match (&left, &right) {
				(Value::Int(a), Value::Int(b)) => a.cmp(b),
				(Value::Str(a), Value::Str(b)) => a.cmp(b),
				(Value::Bool(a), Value::Bool(b)) => a.cmp(b),
				(a, b) => {
					return Err(env.mismatch(format!(
						"cannot order {} against {}",
						a.type_name(),
						b.type_name()
					)));
				}
			};
			let result = match op {
				BinaryOp::Lt => ordering.is_lt(),
				BinaryOp::Le => ordering.is_le(),
				BinaryOp::Gt => ordering.is_gt(),
				BinaryOp::Ge => ordering.is_ge(),
				_ => unreachable!(),
			};
			Ok(Value::Bool(result))
		}
		BinaryOp::In => {
			match (&left, &right) {
				(needle, Value::List(haystack)) => Ok(Value::Bool(haystack.contains(needle))),
				(Value::Str(needle), Value::Str(haystack)) => {
					Ok(Value::Bool(haystack.contains(needle.as_str())))
				}
				(a, b) => {
					Err(env.mismatch(format!(
						"`in` needs a list or string on the right, got {} in {}",
						a.type_name(),
						b.type_name()
					)))
				}
			}
		}
		BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
	}
}
