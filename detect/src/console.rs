use crate::common::*;

/// Print a prompt and block until a line is read from stdin.
pub fn wait_for_enter(prompt: &str) -> Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "{}", prompt)?;
    stdout.flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(())
}
