use std::io::{self, BufRead, Write};

pub const WARNING: &str = "\
This program should only be used to recover from specific transaction
related problems in a database. Casual use is strongly discouraged.
Irreversible damage may be caused through improper use of this tool.

This program should not be run while any controller machine agents
are running.

Have all controller machine agents been shut down?";

/// Ask the operator to confirm the run. Only `y` or `yes` proceeds; EOF declines.
pub fn confirm<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> io::Result<bool> {
    write!(output, "{} [y/n] ", WARNING)?;
    output.flush()?;

    let mut answer = String::new();
    if input.read_line(&mut answer)? == 0 {
        writeln!(output)?;
        return Ok(false);
    }
    Ok(is_affirmative(&answer))
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
