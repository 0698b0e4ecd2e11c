//! Bundled doors: a welcome screen and a chat lobby.

use std::sync::Arc;

use async_trait::async_trait;

use super::door::{Door, DoorContext, DoorError, DoorExit};
use crate::bus::{Event, Target, Topic};
use crate::operator::{ActionStatus, OperatorAction};
use crate::session::LineRead;

const MAX_LINE: usize = 200;
const LOBBY_TOPICS: &[Topic] = &[
    Topic::Chat,
    Topic::Page,
    Topic::Login,
    Topic::Logout,
    Topic::Refresh,
];

/// Greets the user with what the probe found, then hands over to `next`.
pub struct WelcomeDoor {
    next: Arc<dyn Door>,
}

impl WelcomeDoor {
    pub fn new(next: Arc<dyn Door>) -> Self {
        Self { next }
    }
}

#[async_trait]
impl Door for WelcomeDoor {
    fn name(&self) -> &str {
        "welcome"
    }

    async fn run(&self, ctx: &mut DoorContext<'_>) -> Result<DoorExit, DoorError> {
        let caps = ctx.terminal.capabilities();
        let handle = ctx.session.handle().unwrap_or_default();
        ctx.session
            .write_text(&format!(
                "\r\nWelcome, {}. Terminal {} at {}x{} ({}).\r\n",
                handle, caps.term_type, caps.cols, caps.rows, caps.encoding
            ))
            .await?;
        Ok(DoorExit::Next(Arc::clone(&self.next)))
    }
}

/// Shared chat room. Lines are relayed to every other session; slash
/// commands cover who, paging, and operator actions.
#[derive(Debug, Default)]
pub struct LobbyDoor;

impl LobbyDoor {
    pub fn new() -> Self {
        Self
    }

    async fn who(&self, ctx: &DoorContext<'_>) -> Result<(), DoorError> {
        let mut text = String::from("Who's online:\r\n");
        for snapshot in ctx.registry.list() {
            let handle = snapshot.handle.as_deref().unwrap_or("(login)");
            let state = if snapshot.is_detached() {
                "detached".to_string()
            } else {
                format!("{} tty", snapshot.terminals.len())
            };
            let marker = if snapshot.id == ctx.session.id() { "*" } else { " " };
            text.push_str(&format!(
                "{} {:<24} {:<12} {}\r\n",
                marker, handle, state, snapshot.activity
            ));
        }
        ctx.session.write_text(&text).await?;
        Ok(())
    }

    async fn page(&self, ctx: &DoorContext<'_>, args: &str) -> Result<(), DoorError> {
        let Some((target, text)) = args.trim().split_once(' ') else {
            ctx.session.write_text("Usage: /page <handle> <message>\r\n").await?;
            return Ok(());
        };
        let recipients: Vec<_> = ctx
            .registry
            .lookup_by_handle(target)
            .iter()
            .map(|session| session.id())
            .collect();
        if recipients.is_empty() {
            ctx.session
                .write_text(&format!("No one called {} is here.\r\n", target))
                .await?;
            return Ok(());
        }
        ctx.session.post(
            &Target::Sessions(recipients),
            Event::Page {
                from: ctx.session.id(),
                handle: ctx.session.handle().unwrap_or_default(),
                text: text.trim().to_string(),
            },
        );
        Ok(())
    }

    async fn operate(
        &self,
        ctx: &mut DoorContext<'_>,
        verb: &str,
        args: &str,
    ) -> Result<Option<DoorExit>, DoorError> {
        let action = if verb == "unspy" {
            Some(OperatorAction::Unspy)
        } else {
            let target = ctx
                .registry
                .lookup_by_handle(args.trim())
                .first()
                .map(|session| session.id());
            let Some(target) = target else {
                ctx.session
                    .write_text(&format!("No session for '{}'.\r\n", args.trim()))
                    .await?;
                return Ok(None);
            };
            match verb {
                "kill" => Some(OperatorAction::Kill(target)),
                "disconnect" => Some(OperatorAction::Disconnect(target)),
                "hijack" => Some(OperatorAction::Hijack(target)),
                "spy" => Some(OperatorAction::Spy(target)),
                _ => None,
            }
        };
        let Some(action) = action else {
            return Ok(None);
        };

        let status = ctx.console.perform(&ctx.session, &ctx.terminal, action);
        let message = match status {
            ActionStatus::Done => "Done.",
            ActionStatus::PermissionDenied => "Permission denied.",
            ActionStatus::NotFound => "No such session.",
            ActionStatus::Conflict => "Not possible right now.",
        };
        ctx.terminal.write_text(&format!("{}\r\n", message)).await?;

        if status == ActionStatus::Done && matches!(action, OperatorAction::Hijack(_)) {
            return Ok(Some(DoorExit::Restart));
        }
        Ok(None)
    }

    async fn notice(&self, ctx: &DoorContext<'_>, event: Event) -> Result<(), DoorError> {
        let line = match event {
            Event::Chat { handle, text, .. } => format!("<{}> {}", handle, text),
            Event::Page { handle, text, .. } => format!("*{}* {}", handle, text),
            Event::Login { handle, .. } => format!("*** {} has logged in", handle),
            Event::Logout { handle, .. } => format!("*** {} has logged out", handle),
            Event::Refresh => String::new(),
            Event::Input { .. } | Event::ConnectionClosed { .. } => return Ok(()),
        };
        // Clear the prompt line, print the notice, redraw what was typed.
        let mut text = String::from("\r\x1b[K");
        if !line.is_empty() {
            text.push_str(&line);
            text.push_str("\r\n");
        }
        text.push_str("> ");
        text.push_str(ctx.input.partial_line());
        ctx.session.write_text(&text).await?;
        Ok(())
    }
}

#[async_trait]
impl Door for LobbyDoor {
    fn name(&self) -> &str {
        "lobby"
    }

    async fn run(&self, ctx: &mut DoorContext<'_>) -> Result<DoorExit, DoorError> {
        ctx.session.set_activity("lobby");
        ctx.session
            .write_text("Type to chat. /who, /page, /quit, /help.\r\n")
            .await?;
        self.who(ctx).await?;

        loop {
            ctx.session.write_text("> ").await?;
            let read = ctx
                .input
                .read_line_or(&ctx.session, MAX_LINE, LOBBY_TOPICS, Some(ctx.idle_timeout))
                .await?;
            let line = match read {
                LineRead::Line(line) => line,
                LineRead::Event(event) => {
                    self.notice(ctx, event).await?;
                    continue;
                }
                LineRead::TimedOut => {
                    ctx.session.write_text("\r\nIdle timeout.\r\n").await?;
                    return Ok(DoorExit::Disconnect);
                }
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some(command) = line.strip_prefix('/') else {
                let handle = ctx.session.handle().unwrap_or_default();
                ctx.session.post_others(Event::Chat {
                    from: ctx.session.id(),
                    handle,
                    text: line.to_string(),
                });
                continue;
            };

            let (verb, args) = command.split_once(' ').unwrap_or((command, ""));
            match verb {
                "quit" | "logoff" => {
                    ctx.session.write_text("Goodbye.\r\n").await?;
                    return Ok(DoorExit::Logoff);
                }
                "bye" | "detach" => {
                    ctx.session.write_text("Session kept. See you.\r\n").await?;
                    return Ok(DoorExit::Disconnect);
                }
                "who" => self.who(ctx).await?,
                "page" => self.page(ctx, args).await?,
                "kill" | "disconnect" | "hijack" | "spy" | "unspy" => {
                    if let Some(exit) = self.operate(ctx, verb, args).await? {
                        return Ok(exit);
                    }
                }
                _ => {
                    ctx.session
                        .write_text("Commands: /who /page <handle> <msg> /bye /quit\r\n")
                        .await?;
                }
            }
        }
    }
}
