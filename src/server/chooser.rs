use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use crate::resume::{ResumeChoice, ResumeChooser};
use crate::session::{InputReader, Session};

/// Menus this short are answered with a single key press.
const SINGLE_KEY_CHOICES: usize = 9;
const MAX_CHOICE_DIGITS: usize = 4;

/// Resume menu drawn on the connecting terminal. Short menus take one
/// digit; longer ones a number followed by Enter.
pub struct TerminalChooser<'a> {
    session: &'a Session,
    input: &'a mut InputReader,
}

impl<'a> TerminalChooser<'a> {
    pub fn new(session: &'a Session, input: &'a mut InputReader) -> Self {
        Self { session, input }
    }
}

fn describe(choice: &ResumeChoice) -> String {
    match choice {
        ResumeChoice::StartNew => "Start a new session".to_string(),
        ResumeChoice::Existing(snapshot) => {
            let activity = if snapshot.activity.is_empty() {
                "idle"
            } else {
                snapshot.activity.as_str()
            };
            let online = SystemTime::now()
                .duration_since(snapshot.login_at)
                .unwrap_or(Duration::ZERO);
            let detached = snapshot.detached_for.unwrap_or(Duration::ZERO);
            format!(
                "Resume session {} ({}, on {}m, detached {}m)",
                snapshot.id,
                activity,
                online.as_secs() / 60,
                detached.as_secs() / 60
            )
        }
    }
}

/// Render the numbered menu text for `choices`.
pub fn render_menu(choices: &[ResumeChoice]) -> String {
    let mut menu = String::from("\r\nYou have sessions waiting:\r\n");
    for (index, choice) in choices.iter().enumerate() {
        menu.push_str(&format!("  {}) {}\r\n", index + 1, describe(choice)));
    }
    menu.push_str("Choice: ");
    menu
}

#[async_trait]
impl ResumeChooser for TerminalChooser<'_> {
    async fn choose(&mut self, choices: &[ResumeChoice]) -> Option<ResumeChoice> {
        if choices.is_empty() {
            return None;
        }
        self.session.write_text(&render_menu(choices)).await.ok()?;
        // The negotiator bounds the whole exchange.
        if choices.len() <= SINGLE_KEY_CHOICES {
            loop {
                let key = self.input.read_key(self.session, None).await.ok()??;
                if let Some(choice) = pick(choices, &char::from(key).to_string()) {
                    let _ = self.session.write_text(&format!("{}\r\n", char::from(key))).await;
                    return Some(choice.clone());
                }
            }
        }
        loop {
            let line = self.input.read_line(self.session, MAX_CHOICE_DIGITS, None).await.ok()??;
            if let Some(choice) = pick(choices, &line) {
                return Some(choice.clone());
            }
            self.session.write_text("Choice: ").await.ok()?;
        }
    }
}

/// The choice numbered `answer` (1-based), if any.
fn pick<'c>(choices: &'c [ResumeChoice], answer: &str) -> Option<&'c ResumeChoice> {
    answer
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|number| number.checked_sub(1))
        .and_then(|index| choices.get(index))
}
