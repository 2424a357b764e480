use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Result, bail};

/// Ask before deleting `count` snapshots. `--force` skips the prompt.
pub fn confirm_deletion(count: usize, force: bool) -> Result<bool> {
  if force {
    return Ok(true);
  }
  if !io::stdin().is_terminal() || !io::stderr().is_terminal() {
    bail!("Refusing to delete snapshots without confirmation. Use --force in non-interactive mode.");
  }

  let mut stderr = io::stderr().lock();
  write!(stderr, "Delete {} snapshot(s)? [y/N] ", count)?;
  stderr.flush()?;

  let mut answer = String::new();
  io::stdin().lock().read_line(&mut answer)?;
  Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
  let answer = answer.trim();
  answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}
