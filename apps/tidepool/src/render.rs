//! Plain-text rendering of chat snapshots for the terminal.

use tidepool_core::ChatMessage;
use tidepool_sync::chat::{ChatPhase, ChatSnapshot};

/// Turns successive snapshots into the lines that changed.
#[derive(Debug, Default)]
pub struct ChatRenderer {
    last: Option<ChatSnapshot>,
}

impl ChatRenderer {
    pub fn update(&mut self, next: &ChatSnapshot) -> Vec<String> {
        let mut lines = Vec::new();
        let previous = self.last.as_ref();

        if previous.map(|p| p.phase) != Some(next.phase) {
            if let Some(line) = phase_line(next.phase) {
                lines.push(line.to_string());
            }
        }

        if previous.map(|p| &p.roster) != Some(&next.roster) && !next.roster.is_empty() {
            let names: Vec<&str> = next.active_participants().map(|p| p.label()).collect();
            lines.push(format!("-- {} online: {} --", names.len(), names.join(", ")));
        }

        let shown = previous.map(|p| p.messages.as_slice()).unwrap_or_default();
        if is_prefix(shown, &next.messages) {
            for message in &next.messages[shown.len()..] {
                lines.push(message_line(next, message));
            }
        } else {
            // history replaced or something was removed: redraw
            lines.push("-- messages --".to_string());
            for message in &next.messages {
                lines.push(message_line(next, message));
            }
        }

        self.last = Some(next.clone());
        lines
    }
}

fn phase_line(phase: ChatPhase) -> Option<&'static str> {
    match phase {
        ChatPhase::Connecting => Some("-- connecting --"),
        ChatPhase::Synchronized => Some("-- connected --"),
        ChatPhase::Stale => Some("-- connection lost; messages may be out of date --"),
        ChatPhase::Disconnected => None,
    }
}

fn is_prefix(shown: &[ChatMessage], next: &[ChatMessage]) -> bool {
    shown.len() <= next.len() && shown.iter().zip(next).all(|(a, b)| a.id == b.id)
}

fn message_line(snapshot: &ChatSnapshot, message: &ChatMessage) -> String {
    let marker = if snapshot.is_own(message) { "*" } else { " " };
    format!(
        "{marker}[{}] {}: {}",
        message.time,
        snapshot.author_label(message),
        message.body
    )
}
