//! Interactive exec bridge.
//!
//! Runs a command inside the session container and wires it to the local
//! terminal until the session ends. Three tasks run side by side:
//!
//! - **signal**: waits for SIGINT/SIGTERM (handlers installed before raw mode)
//! - **forward**: local stdin -> remote stdin
//! - **relay**: remote stdout/stderr -> local stdout/stderr
//!
//! Each posts to a shared completion channel when it finishes. The first post
//! ends the session; the remaining tasks are aborted without draining
//! in-flight bytes. Raw mode is held from just before attach until the first
//! post has been consumed.

use std::io;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::engine::{ContainerEngine, ExecSpec, ExecStreams, OutputChunk};
use crate::error::{EngineError, ExecError};
use crate::terminal::{RawModeGuard, TerminalMode};

/// Why an interactive session ended. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The host delivered an interrupt or terminate signal.
    Signal,
    /// Local stdin reached EOF or failed.
    InputClosed,
    /// The remote output stream closed or failed.
    OutputClosed,
}

/// Result of a finished interactive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    pub end: SessionEnd,
    /// Remote exit code, known only when the remote side closed the session.
    pub exit_code: Option<i64>,
}

/// Local endpoints of a session.
pub struct LocalIo {
    pub stdin: Box<dyn AsyncRead + Send + Unpin>,
    pub stdout: Box<dyn AsyncWrite + Send + Unpin>,
    pub stderr: Box<dyn AsyncWrite + Send + Unpin>,
    pub shutdown: Shutdown,
}

impl LocalIo {
    /// The process's own stdio, ended by host signals.
    pub fn stdio() -> Self {
        Self {
            stdin: Box::new(tokio::io::stdin()),
            stdout: Box::new(tokio::io::stdout()),
            stderr: Box::new(tokio::io::stderr()),
            shutdown: Shutdown::HostSignals,
        }
    }
}

/// What ends a session from the outside.
pub enum Shutdown {
    /// SIGINT or SIGTERM (Ctrl+C off unix). Handlers go in when armed; until
    /// then the default disposition applies.
    HostSignals,
    /// Resolves when the session should end.
    When(BoxFuture<'static, ()>),
}

impl Shutdown {
    /// Start listening and return the future that resolves on shutdown.
    ///
    /// For host signals the handlers are installed before this returns, so a
    /// signal arriving before the future is first polled is not lost.
    pub fn arm(self) -> BoxFuture<'static, ()> {
        match self {
            Shutdown::HostSignals => shutdown_signal(),
            Shutdown::When(trigger) => trigger,
        }
    }
}

/// Install SIGINT and SIGTERM handlers now; the returned future resolves on
/// the first of them.
///
/// If the handlers cannot be installed the future never resolves, leaving
/// the session to end through its streams.
#[cfg(unix)]
pub fn shutdown_signal() -> BoxFuture<'static, ()> {
    use tokio::signal::unix::{SignalKind, signal};

    match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
        (Ok(mut interrupt), Ok(mut terminate)) => Box::pin(async move {
            tokio::select! {
                _ = interrupt.recv() => tracing::debug!("SIGINT received"),
                _ = terminate.recv() => tracing::debug!("SIGTERM received"),
            }
        }),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!("Failed to install signal handlers: {}", e);
            Box::pin(std::future::pending())
        }
    }
}

/// Install a Ctrl+C handler now; the returned future resolves when it fires.
#[cfg(not(unix))]
pub fn shutdown_signal() -> BoxFuture<'static, ()> {
    match tokio::signal::windows::ctrl_c() {
        Ok(mut ctrl_c) => Box::pin(async move {
            ctrl_c.recv().await;
            tracing::debug!("Ctrl+C received");
        }),
        Err(e) => {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
            Box::pin(std::future::pending())
        }
    }
}

/// Starts interactive execs and bridges them to local I/O.
pub struct ExecBridge {
    engine: Arc<dyn ContainerEngine>,
    terminal: Arc<dyn TerminalMode>,
}

impl ExecBridge {
    pub fn new(engine: Arc<dyn ContainerEngine>, terminal: Arc<dyn TerminalMode>) -> Self {
        Self { engine, terminal }
    }

    /// Run `spec` inside `container` and return when the session ends.
    ///
    /// Exec creation or attach failures are fatal and never retried. The
    /// terminal is back in its prior mode before this returns, whatever the
    /// exit path.
    pub async fn run(
        &self,
        container: &str,
        spec: &ExecSpec,
        mut io: LocalIo,
    ) -> Result<SessionOutcome, ExecError> {
        let exec_id = self
            .engine
            .create_exec(container, spec)
            .await
            .map_err(setup_failed)?;
        tracing::debug!(container, exec = %exec_id, "Exec created");

        io.shutdown = Shutdown::When(io.shutdown.arm());
        let guard = RawModeGuard::acquire(self.terminal.clone()).map_err(ExecError::Terminal)?;

        let streams = self
            .engine
            .attach_exec(&exec_id)
            .await
            .map_err(setup_failed)?;

        if let Some((width, height)) = self.terminal.size()
            && let Err(e) = self.engine.resize_exec(&exec_id, width, height).await
        {
            tracing::warn!(exec = %exec_id, "Failed to resize remote terminal: {}", e);
        }

        let end = relay_session(streams, io).await;
        drop(guard);
        tracing::debug!(exec = %exec_id, ?end, "Session ended");

        let exit_code = match end {
            SessionEnd::OutputClosed => match self.engine.exec_exit_code(&exec_id).await {
                Ok(code) => code,
                Err(e) => {
                    tracing::debug!(exec = %exec_id, "Could not read exit code: {}", e);
                    None
                }
            },
            SessionEnd::Signal | SessionEnd::InputClosed => None,
        };

        Ok(SessionOutcome { end, exit_code })
    }
}

fn setup_failed(err: EngineError) -> ExecError {
    ExecError::SetupFailed {
        reason: err.to_string(),
    }
}

/// Pump both directions until the first of signal, input EOF or output EOF.
pub async fn relay_session(streams: ExecStreams, io: LocalIo) -> SessionEnd {
    let ExecStreams {
        mut input,
        mut output,
    } = streams;
    let LocalIo {
        mut stdin,
        mut stdout,
        mut stderr,
        shutdown,
    } = io;

    // One slot per task, so no post ever waits on the receiver.
    let (done_tx, mut done_rx) = mpsc::channel::<SessionEnd>(3);

    let shutdown = shutdown.arm();
    let signal_tx = done_tx.clone();
    let signal_task = tokio::spawn(async move {
        shutdown.await;
        let _ = signal_tx.send(SessionEnd::Signal).await;
    });

    let forward_tx = done_tx.clone();
    let forward_task = tokio::spawn(async move {
        match tokio::io::copy(&mut stdin, &mut input).await {
            Ok(bytes) => tracing::debug!(bytes, "Local input closed"),
            Err(e) => tracing::debug!("Input forwarding stopped: {}", e),
        }
        let _ = forward_tx.send(SessionEnd::InputClosed).await;
    });

    let relay_task = tokio::spawn(async move {
        match relay_output(&mut output, &mut stdout, &mut stderr).await {
            Ok(()) => tracing::debug!("Remote output closed"),
            Err(e) => tracing::debug!("Output relay stopped: {}", e),
        }
        let _ = done_tx.send(SessionEnd::OutputClosed).await;
    });

    // Every task posts before exiting, so recv only yields None if all panicked.
    let end = done_rx.recv().await.unwrap_or(SessionEnd::OutputClosed);

    signal_task.abort();
    forward_task.abort();
    relay_task.abort();

    end
}

/// Copy remote output to the matching local stream, preserving order.
pub async fn relay_output<S, O, E>(output: &mut S, stdout: &mut O, stderr: &mut E) -> io::Result<()>
where
    S: Stream<Item = Result<OutputChunk, EngineError>> + Unpin + ?Sized,
    O: AsyncWrite + Unpin + ?Sized,
    E: AsyncWrite + Unpin + ?Sized,
{
    while let Some(chunk) = output.next().await {
        match chunk.map_err(io::Error::other)? {
            OutputChunk::Stdout(bytes) => {
                stdout.write_all(&bytes).await?;
                stdout.flush().await?;
            }
            OutputChunk::Stderr(bytes) => {
                stderr.write_all(&bytes).await?;
                stderr.flush().await?;
            }
        }
    }
    Ok(())
}
