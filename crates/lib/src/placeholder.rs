//! Placeholder parsing and substitution for installer command templates.
//!
//! Command templates reference values that are only known when the installer
//! runs, such as the staging directory or the package list.
//!
//! # Placeholder Formats
//!
//! - `$${out}` - staging directory the installer must write into
//! - `$${tool}` - installer tool name, e.g. `pip`
//! - `$${packages}` - space separated, shell-quoted package names
//! - `$${cache_flags}` - the configured no-cache flag, or nothing
//!
//! # Shell Variables
//!
//! Single `$` characters pass through unchanged, so shell variables like
//! `$HOME` and `$PATH` work naturally without any escaping.
//!
//! # Escaping
//!
//! Use `$$$` before `{` to produce a literal `$${` sequence.
//!
//! # Example
//!
//! ```
//! use envbake_lib::placeholder::{parse, Segment, Placeholder};
//!
//! let segments = parse("$${tool} install --target $${out}").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Placeholder(Placeholder::Tool),
//!     Segment::Literal(" install --target ".to_string()),
//!     Segment::Placeholder(Placeholder::Out),
//! ]);
//! ```

use thiserror::Error;

/// A parsed placeholder reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
  /// `$${out}`
  Out,

  /// `$${tool}`
  Tool,

  /// `$${packages}`
  Packages,

  /// `$${cache_flags}`
  CacheFlags,
}

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  /// Literal text (no placeholders)
  Literal(String),

  /// A placeholder to be resolved
  Placeholder(Placeholder),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaceholderError {
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("unknown placeholder: {0}")]
  Unknown(String),

  #[error("placeholder '{0}' has no value here")]
  Unresolved(&'static str),
}

impl Placeholder {
  pub fn name(&self) -> &'static str {
    match self {
      Placeholder::Out => "out",
      Placeholder::Tool => "tool",
      Placeholder::Packages => "packages",
      Placeholder::CacheFlags => "cache_flags",
    }
  }
}

/// Supplies placeholder values during substitution.
pub trait Resolver {
  fn resolve(&self, placeholder: &Placeholder) -> Result<&str, PlaceholderError>;
}

/// Parse a string containing placeholders into segments.
///
/// # Errors
///
/// Returns an error if a placeholder is unclosed or unknown.
pub fn parse(input: &str) -> Result<Vec<Segment>, PlaceholderError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '$' {
      literal.push(ch);
      continue;
    }

    match chars.peek() {
      Some((_, '$')) => {
        chars.next();

        match chars.peek() {
          Some((_, '$')) => {
            chars.next();

            match chars.peek() {
              Some((_, '{')) => {
                // $$${ -> literal $${
                literal.push_str("$${");
                chars.next();
              }
              _ => literal.push_str("$$$"),
            }
          }
          Some((_, '{')) => {
            chars.next();

            if !literal.is_empty() {
              segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }

            let mut content = String::new();
            let mut found_close = false;
            for (_, c) in chars.by_ref() {
              if c == '}' {
                found_close = true;
                break;
              }
              content.push(c);
            }

            if !found_close {
              return Err(PlaceholderError::Unclosed(pos));
            }

            segments.push(Segment::Placeholder(parse_placeholder_content(content.trim())?));
          }
          _ => literal.push_str("$$"),
        }
      }
      _ => literal.push('$'),
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

fn parse_placeholder_content(content: &str) -> Result<Placeholder, PlaceholderError> {
  match content {
    "out" => Ok(Placeholder::Out),
    "tool" => Ok(Placeholder::Tool),
    "packages" => Ok(Placeholder::Packages),
    "cache_flags" => Ok(Placeholder::CacheFlags),
    other => Err(PlaceholderError::Unknown(other.to_string())),
  }
}

/// Parse and substitute in one step.
pub fn substitute(input: &str, resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let segments = parse(input)?;
  substitute_segments(&segments, resolver)
}

/// Substitute placeholders in pre-parsed segments.
pub fn substitute_segments(segments: &[Segment], resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let mut result = String::new();

  for segment in segments {
    match segment {
      Segment::Literal(s) => result.push_str(s),
      Segment::Placeholder(p) => result.push_str(resolver.resolve(p)?),
    }
  }

  Ok(result)
}
