//! Terminal I/O shared by both shells.

use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

pub type ConsoleLines = Lines<BufReader<Stdin>>;

pub fn stdin_lines() -> ConsoleLines {
    BufReader::new(tokio::io::stdin()).lines()
}

/// Informational shell output.
pub async fn notice(message: &str) -> io::Result<()> {
    write_stdout(&format!("*** {message}")).await
}

/// A rejected command or a failure the operator should see.
pub async fn alert(message: &str) -> io::Result<()> {
    write_stderr(&format!("!!! {message}")).await
}

pub async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

pub async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
