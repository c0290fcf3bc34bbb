use std::collections::HashSet;

use tidepool_core::{
    ChatMessage, ClientIdentity, InboundEvent, OutboundCommand, OutgoingChat, Participant, RoomId,
    SnapshotError,
};

use super::ChatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatPhase {
    Disconnected,
    /// Channel opening or open, no snapshot received yet.
    Connecting,
    /// At least one `history` or `users` snapshot applied.
    Synchronized,
    /// Transport dropped; the view is frozen and will not be refreshed.
    Stale,
}

/// Outcome of applying one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Appended,
    /// Echo of a message this client already holds or deleted.
    Echo,
    RosterReplaced,
    HistoryReplaced,
    Removed,
    /// Nothing matched or the engine is not connected.
    Ignored,
}

/// Immutable view handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSnapshot {
    pub identity: ClientIdentity,
    pub room: Option<RoomId>,
    pub phase: ChatPhase,
    /// Arrival order.
    pub messages: Vec<ChatMessage>,
    pub roster: Vec<Participant>,
}

impl ChatSnapshot {
    pub fn me(&self) -> Option<&Participant> {
        self.participant(self.identity.as_str())
    }

    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.roster.iter().find(|p| p.id == user_id)
    }

    pub fn active_participants(&self) -> impl Iterator<Item = &Participant> {
        self.roster.iter().filter(|p| p.active)
    }

    pub fn is_own(&self, message: &ChatMessage) -> bool {
        message.is_from(&self.identity)
    }

    /// Author label for a message: roster name, then the author profile or
    /// name carried by the message itself, then the raw user id.
    pub fn author_label<'a>(&'a self, message: &'a ChatMessage) -> &'a str {
        let roster = self
            .participant(&message.user_id)
            .and_then(|p| p.name.as_deref());
        let embedded = message.user.as_ref().and_then(|u| u.name.as_deref());
        [roster, embedded, message.name.as_deref()]
            .into_iter()
            .flatten()
            .find(|name| !name.is_empty())
            .unwrap_or(message.user_id.as_str())
    }
}

/// Chat state reducer. Pure: no I/O, fed by the engine's dispatch loop.
#[derive(Debug, Clone)]
pub struct ChatState {
    identity: ClientIdentity,
    room: Option<RoomId>,
    phase: ChatPhase,
    messages: Vec<ChatMessage>,
    roster: Vec<Participant>,
    // ids removed locally whose server echo may still be in flight
    removed: HashSet<String>,
}

impl ChatState {
    pub fn new(identity: ClientIdentity, room: Option<RoomId>) -> Self {
        Self {
            identity,
            room,
            phase: ChatPhase::Disconnected,
            messages: Vec::new(),
            roster: Vec::new(),
            removed: HashSet::new(),
        }
    }

    pub fn phase(&self) -> ChatPhase {
        self.phase
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn roster(&self) -> &[Participant] {
        &self.roster
    }

    pub fn begin_connecting(&mut self) {
        if self.phase == ChatPhase::Disconnected {
            self.phase = ChatPhase::Connecting;
        }
    }

    pub fn mark_stale(&mut self) {
        if matches!(self.phase, ChatPhase::Connecting | ChatPhase::Synchronized) {
            self.phase = ChatPhase::Stale;
        }
    }

    /// Teardown: local state is discarded.
    pub fn disconnect(&mut self) {
        self.phase = ChatPhase::Disconnected;
        self.messages.clear();
        self.roster.clear();
        self.removed.clear();
    }

    fn ensure_live(&self) -> Result<(), ChatError> {
        match self.phase {
            ChatPhase::Connecting | ChatPhase::Synchronized => Ok(()),
            ChatPhase::Stale => Err(ChatError::Stale),
            ChatPhase::Disconnected => Err(ChatError::Closed),
        }
    }

    /// Builds a message, appends it locally and returns the `chat` command to emit.
    pub fn compose(
        &mut self,
        body: &str,
        time: impl Into<String>,
    ) -> Result<(ChatMessage, OutboundCommand), ChatError> {
        self.ensure_live()?;
        if body.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let message = ChatMessage::new_local(&self.identity, self.room, body, time);
        let command = OutboundCommand::Chat(OutgoingChat::from(&message));
        self.messages.push(message.clone());
        Ok((message, command))
    }

    /// Removes the first message with a matching id and returns the `delete`
    /// command. The command is produced even when nothing matched locally.
    pub fn remove(&mut self, message: &ChatMessage) -> Result<(bool, OutboundCommand), ChatError> {
        self.ensure_live()?;
        let removed = match self.messages.iter().position(|m| m.id == message.id) {
            Some(index) => {
                self.messages.remove(index);
                true
            }
            None => false,
        };
        self.removed.insert(message.id.clone());
        Ok((removed, OutboundCommand::Delete(message.clone())))
    }

    /// The roster is left alone; the next `users` snapshot carries the new name.
    pub fn rename(&self, name: &str) -> Result<OutboundCommand, ChatError> {
        self.ensure_live()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::EmptyName);
        }
        Ok(OutboundCommand::Name(name.to_string()))
    }

    pub fn apply(&mut self, event: InboundEvent) -> Result<Applied, SnapshotError> {
        event.validate()?;
        if !matches!(self.phase, ChatPhase::Connecting | ChatPhase::Synchronized) {
            return Ok(Applied::Ignored);
        }

        let applied = match event {
            InboundEvent::Chat(message) => {
                // a tombstone is spent once its echo has been swallowed
                if self.removed.remove(&message.id)
                    || self.messages.iter().any(|m| m.id == message.id)
                {
                    Applied::Echo
                } else {
                    self.messages.push(message);
                    Applied::Appended
                }
            }
            InboundEvent::Users(roster) => {
                self.roster = roster;
                self.phase = ChatPhase::Synchronized;
                Applied::RosterReplaced
            }
            InboundEvent::History(history) => {
                // Replace, never merge: optimistic sends not in the backlog are dropped.
                self.messages = history;
                self.removed.clear();
                self.phase = ChatPhase::Synchronized;
                Applied::HistoryReplaced
            }
            InboundEvent::Delete(message) => {
                self.removed.remove(&message.id);
                match self.messages.iter().position(|m| m.id == message.id) {
                    Some(index) => {
                        self.messages.remove(index);
                        Applied::Removed
                    }
                    None => Applied::Ignored,
                }
            }
        };
        Ok(applied)
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        ChatSnapshot {
            identity: self.identity.clone(),
            room: self.room,
            phase: self.phase,
            messages: self.messages.clone(),
            roster: self.roster.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn me() -> ClientIdentity {
        ClientIdentity::new("me").expect("identity")
    }

    fn connected() -> ChatState {
        let mut state = ChatState::new(me(), None);
        state.begin_connecting();
        state
    }

    fn participant(id: &str, name: Option<&str>) -> Participant {
        Participant {
            id: id.into(),
            name: name.map(str::to_string),
            active: true,
        }
    }

    fn remote_message(id: &str, body: &str) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            user_id: "someone".into(),
            body: body.into(),
            time: "08:00".into(),
            room_id: None,
            name: None,
            user: None,
        }
    }

    fn bodies(state: &ChatState) -> Vec<&str> {
        state.messages().iter().map(|m| m.body.as_str()).collect()
    }

    #[test]
    fn display_order_is_send_order_not_time() {
        let mut state = connected();
        state.compose("A", "23:59").unwrap();
        state.compose("B", "00:01").unwrap();
        state.compose("C", "12:00").unwrap();
        assert_eq!(bodies(&state), ["A", "B", "C"]);
    }

    #[test]
    fn compose_emits_matching_chat_command() {
        let mut state = ChatState::new(me(), Some(RoomId(4)));
        state.begin_connecting();
        let (message, command) = state.compose("hello", "10:15").unwrap();
        match command {
            OutboundCommand::Chat(chat) => {
                assert_eq!(chat.id, message.id);
                assert_eq!(chat.user_id, "me");
                assert_eq!(chat.room_id, Some(RoomId(4)));
                assert_eq!(chat.time, "10:15");
                assert_eq!(chat.body, "hello");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn blank_messages_are_rejected() {
        let mut state = connected();
        assert!(matches!(state.compose("  \n", "10:00"), Err(ChatError::EmptyMessage)));
        assert!(state.messages().is_empty());
    }

    #[test]
    fn users_snapshot_replaces_roster() {
        let mut state = connected();
        state
            .apply(InboundEvent::Users(vec![participant("1", None)]))
            .unwrap();
        let applied = state
            .apply(InboundEvent::Users(vec![participant("2", None)]))
            .unwrap();
        assert_eq!(applied, Applied::RosterReplaced);
        let ids: Vec<_> = state.roster().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["2"]);
    }

    #[test]
    fn history_snapshot_overrides_local_messages() {
        let mut state = connected();
        state.compose("X", "09:00").unwrap();
        state.compose("Y", "09:01").unwrap();
        let z = remote_message("z", "Z");
        state.apply(InboundEvent::History(vec![z.clone()])).unwrap();
        assert_eq!(state.messages(), [z]);
        assert_eq!(state.phase(), ChatPhase::Synchronized);
    }

    #[test]
    fn own_echo_is_not_duplicated() {
        let mut state = connected();
        let (message, _) = state.compose("ping", "09:00").unwrap();
        let applied = state.apply(InboundEvent::Chat(message)).unwrap();
        assert_eq!(applied, Applied::Echo);
        assert_eq!(bodies(&state), ["ping"]);

        let applied = state
            .apply(InboundEvent::Chat(remote_message("r1", "pong")))
            .unwrap();
        assert_eq!(applied, Applied::Appended);
        assert_eq!(bodies(&state), ["ping", "pong"]);
    }

    #[test]
    fn delete_removes_first_match_and_suppresses_late_echo() {
        let mut state = connected();
        let (first, _) = state.compose("oops", "09:00").unwrap();
        state.compose("fine", "09:01").unwrap();

        let (removed, command) = state.remove(&first).unwrap();
        assert!(removed);
        assert_eq!(command, OutboundCommand::Delete(first.clone()));
        assert_eq!(bodies(&state), ["fine"]);

        assert_eq!(state.apply(InboundEvent::Chat(first.clone())).unwrap(), Applied::Echo);
        assert_eq!(state.apply(InboundEvent::Delete(first)).unwrap(), Applied::Ignored);
        assert_eq!(bodies(&state), ["fine"]);
    }

    #[test]
    fn tombstones_are_dropped_once_echoes_are_handled() {
        let mut state = connected();
        let (first, _) = state.compose("one", "09:00").unwrap();
        let (second, _) = state.compose("two", "09:01").unwrap();
        state.remove(&first).unwrap();
        state.remove(&second).unwrap();
        assert_eq!(state.removed.len(), 2);

        assert_eq!(state.apply(InboundEvent::Chat(first)).unwrap(), Applied::Echo);
        assert_eq!(state.removed.len(), 1);
        assert_eq!(state.apply(InboundEvent::Delete(second)).unwrap(), Applied::Ignored);
        assert!(state.removed.is_empty());
    }

    #[test]
    fn server_delete_removes_message() {
        let mut state = connected();
        let message = remote_message("r1", "bye");
        state.apply(InboundEvent::Chat(message.clone())).unwrap();
        assert_eq!(state.apply(InboundEvent::Delete(message)).unwrap(), Applied::Removed);
        assert!(state.messages().is_empty());
    }

    #[test]
    fn rename_waits_for_next_roster() {
        let mut state = connected();
        state
            .apply(InboundEvent::Users(vec![participant("me", None)]))
            .unwrap();
        let command = state.rename("Ada").unwrap();
        assert_eq!(command, OutboundCommand::Name("Ada".into()));
        assert_eq!(state.snapshot().me().and_then(|p| p.name.clone()), None);

        state
            .apply(InboundEvent::Users(vec![participant("me", Some("Ada"))]))
            .unwrap();
        assert_eq!(state.snapshot().me().and_then(|p| p.name.as_deref()), Some("Ada"));
    }

    #[test]
    fn malformed_roster_is_ignored() {
        let mut state = connected();
        state
            .apply(InboundEvent::Users(vec![participant("1", None)]))
            .unwrap();
        let err = state
            .apply(InboundEvent::Users(vec![
                participant("2", None),
                participant("2", None),
            ]))
            .unwrap_err();
        assert_eq!(err, SnapshotError::DuplicateParticipant("2".into()));
        assert_eq!(state.roster().len(), 1);
        assert_eq!(state.roster()[0].id, "1");
    }

    #[test]
    fn phases_follow_connection_lifecycle() {
        let mut state = ChatState::new(me(), None);
        assert_eq!(state.phase(), ChatPhase::Disconnected);
        assert_eq!(
            state.apply(InboundEvent::History(Vec::new())).unwrap(),
            Applied::Ignored
        );

        state.begin_connecting();
        assert_eq!(state.phase(), ChatPhase::Connecting);
        state.apply(InboundEvent::History(Vec::new())).unwrap();
        assert_eq!(state.phase(), ChatPhase::Synchronized);

        state.mark_stale();
        assert_eq!(state.phase(), ChatPhase::Stale);
        assert!(matches!(state.compose("late", "10:00"), Err(ChatError::Stale)));

        state.disconnect();
        assert_eq!(state.phase(), ChatPhase::Disconnected);
        assert!(state.messages().is_empty());
    }

    #[test]
    fn author_label_prefers_roster_name() {
        let mut state = connected();
        let mut message = remote_message("r1", "hi");
        message.name = Some("From History".into());
        state.apply(InboundEvent::Chat(message.clone())).unwrap();

        let snapshot = state.snapshot();
        assert_eq!(snapshot.author_label(&message), "From History");

        state
            .apply(InboundEvent::Users(vec![participant("someone", Some("Grace"))]))
            .unwrap();
        let snapshot = state.snapshot();
        assert_eq!(snapshot.author_label(&message), "Grace");

        message.user_id = "ghost".into();
        message.name = None;
        assert_eq!(snapshot.author_label(&message), "ghost");
    }

    #[test]
    fn author_label_uses_embedded_profile_for_departed_authors() {
        let mut state = connected();
        let history: Vec<ChatMessage> = serde_json::from_str(
            r#"[{"id":1,"userId":"gone","body":"old news","user":{"id":"gone","name":"Rita"}}]"#,
        )
        .expect("history");
        state.apply(InboundEvent::History(history)).unwrap();
        state
            .apply(InboundEvent::Users(vec![participant("someone", Some("Grace"))]))
            .unwrap();

        let snapshot = state.snapshot();
        assert_eq!(snapshot.author_label(&snapshot.messages[0]), "Rita");
    }
}
