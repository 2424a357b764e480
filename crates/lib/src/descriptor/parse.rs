//! Descriptor parsing.
//!
//! Turns descriptor text into a [`Descriptor`]. Only the instruction surface a
//! provisioning descriptor needs is recognized; everything else is rejected
//! with the line it appeared on rather than silently ignored.

use std::path::Path;

use tracing::debug;

use super::types::{BaseArtifact, Descriptor, Instruction, Line, ParseError};

/// Read and parse a descriptor file.
pub fn parse_file(path: &Path) -> Result<Descriptor, ParseError> {
  let text = std::fs::read_to_string(path).map_err(|source| ParseError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  parse(&text)
}

/// Parse descriptor text.
pub fn parse(text: &str) -> Result<Descriptor, ParseError> {
  let mut lines = Vec::new();

  for (number, logical) in logical_lines(text)? {
    let (keyword, rest) = match logical.split_once(char::is_whitespace) {
      Some((keyword, rest)) => (keyword, rest.trim()),
      None => (logical.as_str(), ""),
    };

    match keyword.to_ascii_uppercase().as_str() {
      "FROM" => {
        let reference = single_argument(number, "FROM", "a base reference", rest)?;
        let artifact: BaseArtifact = reference
          .parse()
          .map_err(|source| ParseError::InvalidReference { line: number, source })?;
        lines.push(Line {
          number,
          instruction: Instruction::From(artifact),
        });
      }
      "WORKDIR" => {
        let path = single_argument(number, "WORKDIR", "a path", rest)?;
        lines.push(Line {
          number,
          instruction: Instruction::Workdir(path.to_string()),
        });
      }
      "COPY" => {
        lines.push(Line {
          number,
          instruction: parse_copy(number, rest)?,
        });
      }
      "RUN" => {
        if rest.is_empty() {
          return Err(ParseError::MissingArgument {
            line: number,
            instruction: "RUN",
            expected: "a command",
          });
        }
        for command in rest.split("&&") {
          lines.push(Line {
            number,
            instruction: parse_run_command(number, command.trim())?,
          });
        }
      }
      other => {
        return Err(ParseError::UnsupportedInstruction {
          line: number,
          keyword: other.to_string(),
        });
      }
    }
  }

  debug!(instructions = lines.len(), "parsed descriptor");
  Ok(Descriptor { lines })
}

/// Join `\`-continued lines and drop blanks and comments.
///
/// Yields each logical line with the 1-based number of its first physical line.
fn logical_lines(text: &str) -> Result<Vec<(usize, String)>, ParseError> {
  let mut out = Vec::new();
  let mut pending: Option<(usize, String)> = None;

  for (idx, raw) in text.lines().enumerate() {
    let number = idx + 1;
    let trimmed = raw.trim();

    // Comments inside a continuation are dropped without ending it
    if trimmed.starts_with('#') || (trimmed.is_empty() && pending.is_none()) {
      continue;
    }

    let (content, continues) = match trimmed.strip_suffix('\\') {
      Some(stripped) => (stripped.trim_end(), true),
      None => (trimmed, false),
    };

    let (start, mut buffer) = pending.take().unwrap_or((number, String::new()));
    if !buffer.is_empty() && !content.is_empty() {
      buffer.push(' ');
    }
    buffer.push_str(content);

    if continues {
      pending = Some((start, buffer));
    } else if !buffer.is_empty() {
      out.push((start, buffer));
    }
  }

  if let Some((start, _)) = pending {
    return Err(ParseError::DanglingContinuation { line: start });
  }

  Ok(out)
}

fn single_argument<'a>(
  line: usize,
  instruction: &'static str,
  expected: &'static str,
  rest: &'a str,
) -> Result<&'a str, ParseError> {
  let mut args = rest.split_whitespace();
  let first = args.next().ok_or(ParseError::MissingArgument {
    line,
    instruction,
    expected,
  })?;
  if let Some(extra) = args.next() {
    return Err(ParseError::UnexpectedArgument {
      line,
      instruction,
      argument: extra.to_string(),
    });
  }
  Ok(unquote(first))
}

fn parse_copy(line: usize, rest: &str) -> Result<Instruction, ParseError> {
  let mut args: Vec<String> = Vec::new();
  for token in rest.split_whitespace() {
    if token.starts_with("--") {
      return Err(ParseError::UnsupportedFlag {
        line,
        flag: token.to_string(),
      });
    }
    args.push(unquote(token).to_string());
  }

  if args.len() < 2 {
    return Err(ParseError::MissingArgument {
      line,
      instruction: "COPY",
      expected: "a source and a destination",
    });
  }

  let destination = args.pop().unwrap_or_default();
  Ok(Instruction::Copy {
    sources: args,
    destination,
  })
}

fn parse_run_command(line: usize, command: &str) -> Result<Instruction, ParseError> {
  let mut tokens: Vec<&str> = command.split_whitespace().map(unquote).collect();

  let unsupported = || ParseError::UnsupportedCommand {
    line,
    command: command.to_string(),
  };

  if tokens.is_empty() {
    return Err(unsupported());
  }

  if tokens[0] == "mkdir" {
    if command.contains(SHELL_OPERATORS) {
      return Err(unsupported());
    }
    let mut paths = Vec::new();
    for token in &tokens[1..] {
      match *token {
        "-p" | "--parents" => {}
        flag if flag.starts_with('-') => {
          return Err(ParseError::UnsupportedFlag {
            line,
            flag: flag.to_string(),
          });
        }
        path => paths.push(path.to_string()),
      }
    }
    if paths.is_empty() {
      return Err(ParseError::MissingArgument {
        line,
        instruction: "RUN",
        expected: "at least one directory for mkdir",
      });
    }
    return Ok(Instruction::Mkdir { paths });
  }

  // `python -m pip ...` is the same installer as `pip ...`
  if tokens.len() >= 2 && tokens[0].starts_with("python") && tokens[1] == "-m" {
    tokens.drain(..2);
  }

  if tokens.len() < 2 || tokens[1] != "install" {
    return Err(unsupported());
  }

  let tool = tool_name(tokens[0]);
  if !is_package_name(&tool) {
    return Err(unsupported());
  }
  let mut upgrade = false;
  let mut no_cache = false;
  let mut packages = Vec::new();

  for token in &tokens[2..] {
    match *token {
      "--upgrade" | "-U" => upgrade = true,
      "--no-cache-dir" => no_cache = true,
      flag if flag.starts_with('-') => {
        return Err(ParseError::UnsupportedFlag {
          line,
          flag: flag.to_string(),
        });
      }
      name => {
        if name.contains(['=', '<', '>', '!', '~', '@', ';']) {
          return Err(ParseError::VersionConstraint {
            line,
            requirement: name.to_string(),
          });
        }
        if !is_package_name(name) {
          return Err(ParseError::InvalidPackageName {
            line,
            name: name.to_string(),
          });
        }
        packages.push(name.to_string());
      }
    }
  }

  if packages.is_empty() {
    return Err(ParseError::MissingArgument {
      line,
      instruction: "RUN",
      expected: "at least one package to install",
    });
  }

  if upgrade && packages.len() == 1 && tool_name(&packages[0]) == tool {
    return Ok(Instruction::UpgradeInstaller { tool });
  }

  Ok(Instruction::Install {
    tool,
    packages,
    no_cache,
  })
}

/// Characters that would chain, pipe or redirect in a shell.
const SHELL_OPERATORS: [char; 6] = [';', '|', '&', '>', '<', '`'];

/// A distribution name: ASCII letters, digits, `.`, `_` and `-`, starting and
/// ending with a letter or digit.
fn is_package_name(name: &str) -> bool {
  let bytes = name.as_bytes();
  match (bytes.first(), bytes.last()) {
    (Some(first), Some(last)) => {
      first.is_ascii_alphanumeric()
        && last.is_ascii_alphanumeric()
        && bytes.iter().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
    }
    _ => false,
  }
}

/// `pip3.11` and `pip3` both name the `pip` installer.
fn tool_name(program: &str) -> String {
  program
    .trim_end_matches(|c: char| c.is_ascii_digit() || c == '.')
    .to_string()
}

fn unquote(token: &str) -> &str {
  for quote in ['"', '\''] {
    if let Some(inner) = token.strip_prefix(quote).and_then(|t| t.strip_suffix(quote)) {
      return inner;
    }
  }
  token
}
