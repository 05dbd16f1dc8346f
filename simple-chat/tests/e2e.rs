use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn cli_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("simple_chat");

    let (mut relay_child, mut relay_stdout) = spawn_relay(binary).await?;
    let addr = read_relay_addr(&mut relay_stdout).await?;
    let (host, port) = addr
        .rsplit_once(':')
        .context("relay address without a port")?;

    // Drain additional relay logs in the background so the pipe never fills.
    let relay_log_task = tokio::spawn(async move {
        drain_stdout(relay_stdout).await;
    });

    // Each client hears its own first message, which proves the relay has
    // registered it before anyone else starts talking.
    let mut alice = spawn_client(binary, "alice", host, port).await?;
    alice.send_line("ping").await?;
    alice.expect("> alice: ping", "alice echo").await?;

    let mut bob = spawn_client(binary, "bob", host, port).await?;
    bob.send_line("hi alice").await?;
    bob.expect("> bob: hi alice", "bob echo").await?;
    alice.expect("> bob: hi alice", "alice hears bob").await?;

    alice.send_line("hello bob").await?;
    bob.expect("> alice: hello bob", "bob hears alice").await?;
    alice.expect("> alice: hello bob", "alice echo").await?;

    // Configuration is locked while connected and readable at any time.
    alice.send_line("#getport").await?;
    alice
        .expect(&format!("*** current port: {port}"), "alice getport")
        .await?;

    // Log off, reconnect, and keep chatting under the same identity.
    alice.send_line("#logoff").await?;
    alice.expect("*** logged off", "alice logoff").await?;
    alice.send_line("#sethost 127.0.0.1").await?;
    alice
        .expect("*** host set to: 127.0.0.1", "alice sethost")
        .await?;
    alice.send_line("#login").await?;
    alice
        .expect(
            &format!("*** connected to 127.0.0.1:{port} as alice"),
            "alice reconnect",
        )
        .await?;
    alice.send_line("back again").await?;
    alice.expect("> alice: back again", "alice echo after login").await?;
    bob.expect("> alice: back again", "bob hears alice return")
        .await?;

    alice.send_line("#quit").await?;
    alice.expect("*** leaving chat", "alice quit").await?;
    bob.send_line("#quit").await?;
    bob.expect("*** leaving chat", "bob quit").await?;

    alice.finish("alice client").await?;
    bob.finish("bob client").await?;

    // The relay keeps running after clients leave; terminate it manually.
    let _ = relay_child.kill().await;
    let _ = relay_child.wait().await;
    let _ = relay_log_task.await;

    Ok(())
}

#[tokio::test]
async fn client_without_login_id_is_refused() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("simple_chat");
    let status = Command::new(binary)
        .arg("client")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    assert!(!status.success());
    Ok(())
}

struct ClientProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

impl ClientProcess {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        let stdin = self.stdin.as_mut().context("client stdin already closed")?;
        stdin
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn expect(&mut self, expected: &str, description: &str) -> Result<()> {
        let line = read_line_expect(&mut self.stdout, description).await?;
        if line != expected {
            return Err(anyhow!("{description}: expected '{expected}', got '{line}'"));
        }
        Ok(())
    }

    async fn finish(mut self, name: &str) -> Result<()> {
        // Close stdin so the console reader is not left blocking on it.
        drop(self.stdin.take());
        ensure_success(&mut self.child, name).await
    }
}

async fn spawn_relay(binary: &Path) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("relay")
        .arg("0")
        .arg("--host")
        .arg("127.0.0.1")
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().context("failed to spawn relay")?;
    let stdout = child
        .stdout
        .take()
        .context("relay stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

async fn read_relay_addr(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    let line = read_line(reader)
        .await?
        .context("relay did not emit listening address")?;
    let trimmed = line.trim();
    let addr = trimmed
        .split_whitespace()
        .last()
        .context("unexpected relay banner format")?;
    if !addr.contains(':') {
        return Err(anyhow!("relay banner missing socket: {trimmed}"));
    }
    Ok(addr.to_string())
}

async fn spawn_client(
    binary: &Path,
    login_id: &str,
    host: &str,
    port: &str,
) -> Result<ClientProcess> {
    let mut cmd = Command::new(binary);
    cmd.arg("client")
        .arg(login_id)
        .arg(host)
        .arg(port)
        .env("RUST_LOG", "warn")
        .env("NO_COLOR", "1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn client {login_id}"))?;

    let stdin = child
        .stdin
        .take()
        .context("client stdin missing after spawn")?;
    let stdout = child
        .stdout
        .take()
        .context("client stdout missing after spawn")?;

    let mut process = ClientProcess {
        child,
        stdin: Some(stdin),
        stdout: BufReader::new(stdout),
    };

    process
        .expect(
            &format!("*** connected to {host}:{port} as {login_id}"),
            "waiting for connection banner",
        )
        .await?;

    Ok(process)
}

async fn read_line_expect(
    reader: &mut BufReader<ChildStdout>,
    description: &str,
) -> Result<String> {
    match read_line(reader).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(anyhow!("{description}: stream closed")),
        Err(err) => Err(err.context(format!("{description}: failed to read line"))),
    }
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let read_future = reader.read_line(&mut line);
    let bytes_io = match timeout(READ_TIMEOUT, read_future).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    let byte_count = bytes_io?;
    if byte_count == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while reader
        .read_line(&mut buffer)
        .await
        .map(|bytes| {
            let has_data = bytes > 0;
            if has_data {
                buffer.clear();
            }
            has_data
        })
        .unwrap_or(false)
    {}
}

async fn ensure_success(child: &mut Child, name: &str) -> Result<()> {
    let status = child
        .wait()
        .await
        .with_context(|| format!("failed to await {name} process"))?;
    if !status.success() {
        return Err(anyhow!("{name} exited with status {status}"));
    }
    Ok(())
}
