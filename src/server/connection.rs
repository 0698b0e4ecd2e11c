use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use super::chooser::TerminalChooser;
use super::door::{DoorContext, DoorError, DoorExit};
use super::ServerContext;
use crate::bus::CloseReason;
use crate::resume::ResumeOutcome;
use crate::session::InputReader;
use crate::terminal::{Capabilities, Terminal, TerminalError, TransportKind};

/// Drive one connection from accept to hang-up.
///
/// Pipeline: probe, provisional session, authenticate, resume, door chain.
/// However it ends, the terminal is disconnected from the registry.
pub async fn serve_connection<R, W>(
    ctx: ServerContext,
    kind: TransportKind,
    peer: Option<String>,
    reader: R,
    writer: W,
) where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let caps = Capabilities::from_config(&ctx.config.terminal);
    let terminal = Terminal::spawn(kind, peer, caps, reader, writer);
    tracing::info!(terminal = %terminal.id(), %kind, peer = ?terminal.peer(), "Connection accepted");

    let registry = ctx.registry.clone();
    let terminal = scopeguard::guard(terminal, move |terminal| {
        registry.disconnect(&terminal, CloseReason::Transport);
    });

    let result = tokio::select! {
        result = run_pipeline(&ctx, &terminal) => result,
        _ = ctx.shutdown.wait() => Ok(()),
    };

    match result {
        Ok(()) | Err(DoorError::Terminal(TerminalError::Closed)) => {
            tracing::info!(terminal = %terminal.id(), "Connection finished");
        }
        Err(e) => {
            tracing::warn!(terminal = %terminal.id(), error = %e, "Connection ended with error");
        }
    }
}

async fn run_pipeline(ctx: &ServerContext, terminal: &Arc<Terminal>) -> Result<(), DoorError> {
    let probe = ctx.prober.detect(terminal).await?;
    tracing::debug!(terminal = %terminal.id(), ?probe, "Capabilities settled");

    // Provisional sessions never outlive their connection.
    let provisional = ctx.registry.create_attached(terminal, false)?;

    let mut input = InputReader::new(Arc::clone(terminal));
    let idle_timeout = ctx.config.terminal.input_idle_timeout();
    let Some(identity) = ctx
        .authenticator
        .authenticate(&provisional, &mut input, idle_timeout)
        .await?
    else {
        return Ok(());
    };

    let outcome = {
        let mut chooser = TerminalChooser::new(&provisional, &mut input);
        ctx.negotiator
            .negotiate(&identity.handle, terminal, &mut chooser)
            .await?
    };
    drop(provisional);

    if let Some(session) = ctx.registry.get(outcome.session_id()) {
        session.set_operator(identity.operator);
        match outcome {
            ResumeOutcome::Fresh(_) => session.set_persistent(ctx.config.session.persistent),
            ResumeOutcome::Resumed(_) => {
                session.write_text("Session resumed.\r\n").await?;
            }
        }
    }
    tracing::info!(
        session = %outcome.session_id(),
        terminal = %terminal.id(),
        handle = %identity.handle,
        ?outcome,
        "Login complete"
    );

    let mut door = Arc::clone(&ctx.entry);
    loop {
        let Some(session) = terminal.session().and_then(|id| ctx.registry.get(id)) else {
            return Ok(());
        };
        let mut door_ctx = DoorContext {
            session: Arc::clone(&session),
            terminal: Arc::clone(terminal),
            input: &mut input,
            registry: ctx.registry.clone(),
            console: ctx.console.clone(),
            idle_timeout,
        };
        let exit = door.run(&mut door_ctx).await?;
        tracing::debug!(session = %session.id(), door = door.name(), ?exit, "Door finished");

        match exit {
            DoorExit::Next(next) => door = next,
            DoorExit::Restart => {}
            DoorExit::Disconnect => return Ok(()),
            DoorExit::Logoff => {
                // Someone else may have ended it first.
                let _ = ctx.registry.terminate(session.id(), CloseReason::SessionTerminated);
                return Ok(());
            }
        }
    }
}
