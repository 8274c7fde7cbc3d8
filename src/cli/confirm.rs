//! Interactive yes/no confirmation.
//!
//! Kept separate from clap parsing so the pipeline can take the answer as an
//! injected decision. `--yes` bypasses this module entirely.

use std::io::{self, BufRead, ErrorKind, Write};
use std::sync::atomic::{AtomicBool, Ordering};

/// Ask on stdin/stdout. I/O failures count as the default answer.
pub fn prompt_yes_no(message: &str, default: bool, interrupt: &AtomicBool) -> bool {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    ask(message, default, interrupt, &mut stdin.lock(), &mut stdout).unwrap_or(default)
}

/// Ask until the answer is one of `y`, `yes`, `n`, `no` (any case).
///
/// An empty line or end of input selects `default`. Once `interrupt` is set
/// the answer is `false`, whatever was typed.
pub fn ask<R: BufRead, W: Write>(
    message: &str,
    default: bool,
    interrupt: &AtomicBool,
    input: &mut R,
    out: &mut W,
) -> io::Result<bool> {
    let hint = if default { "Y/n" } else { "y/N" };
    loop {
        if interrupt.load(Ordering::SeqCst) {
            return Ok(false);
        }
        write!(out, "{message} ({hint}): ")?;
        out.flush()?;

        let mut line = String::new();
        let read = match input.read_line(&mut line) {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            other => other?,
        };
        if interrupt.load(Ordering::SeqCst) {
            writeln!(out)?;
            return Ok(false);
        }
        if read == 0 {
            writeln!(out)?;
            return Ok(default);
        }

        match line.trim().to_lowercase().as_str() {
            "" => return Ok(default),
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            other => writeln!(out, "Please answer 'y' or 'n' (got '{other}'), or press Enter for the default.")?,
        }
    }
}
