use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info, warn};

use super::events::{ChatMessage, InboundEvent, PlayerPresence, ServerId, WireError};
use super::server::{PlayerRef, RosterChange, ServerViewState};

/// Result of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// State was modified.
    Changed,
    /// A recognised event that left state as it was (unknown server, player
    /// already gone, status already set, ...).
    Unchanged,
    /// An event type this client doesn't handle.
    Ignored,
}

/// Live per-server view, seeded from a snapshot and kept current by feed
/// events. Owned by a single task; events must be applied in delivery order.
#[derive(Debug, Default)]
pub struct LiveState {
    servers: BTreeMap<ServerId, ServerViewState>,
    /// Append-only. Not trimmed for the lifetime of the state.
    chat: HashMap<ServerId, Vec<ChatMessage>>,
}

impl LiveState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every server view with a fresh snapshot. Chat logs are kept.
    pub fn load_snapshot(&mut self, servers: impl IntoIterator<Item = ServerViewState>) {
        self.servers.clear();
        for mut srv in servers {
            srv.dedup_players();
            self.servers.insert(srv.id, srv);
        }
        info!(count = self.servers.len(), "loaded server snapshot");
    }

    pub fn server(&self, id: ServerId) -> Option<&ServerViewState> {
        self.servers.get(&id)
    }

    /// All servers, ordered by id.
    pub fn servers(&self) -> impl Iterator<Item = &ServerViewState> {
        self.servers.values()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Chat received for a server, oldest first.
    pub fn chat_log(&self, server_id: ServerId) -> &[ChatMessage] {
        self.chat.get(&server_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Decode one feed frame and apply it.
    pub fn apply_frame(&mut self, text: &str) -> Result<Applied, WireError> {
        let event = InboundEvent::decode(text)?;
        Ok(self.apply(event))
    }

    /// Apply one decoded event.
    pub fn apply(&mut self, event: InboundEvent) -> Applied {
        match event {
            InboundEvent::PlayerJoin(p) => self.player_join(p),
            InboundEvent::PlayerQuit(p) => self.player_quit(p),
            InboundEvent::ServerOnline(s) => self.set_online(s.server_id, true),
            InboundEvent::ServerOffline(s) => self.set_online(s.server_id, false),
            InboundEvent::Chat(msg) => self.append_chat(msg),
            InboundEvent::Unknown { kind } => {
                warn!(%kind, "ignoring unrecognised live event");
                Applied::Ignored
            }
        }
    }

    fn player_join(&mut self, p: PlayerPresence) -> Applied {
        let server_id = p.server_id;
        let Some(srv) = self.servers.get_mut(&server_id) else {
            debug!(server_id, player_id = p.id, "join for unknown server");
            return Applied::Unchanged;
        };

        let player_id = p.id;
        match srv.upsert_player(PlayerRef::from(p)) {
            RosterChange::Added => {
                debug!(server_id, player_id, "player joined");
                Applied::Changed
            }
            RosterChange::Updated => {
                debug!(server_id, player_id, "repeated join refreshed roster entry");
                Applied::Changed
            }
            RosterChange::Unchanged => Applied::Unchanged,
        }
    }

    fn player_quit(&mut self, p: PlayerPresence) -> Applied {
        let Some(srv) = self.servers.get_mut(&p.server_id) else {
            debug!(server_id = p.server_id, player_id = p.id, "quit for unknown server");
            return Applied::Unchanged;
        };

        if srv.remove_player(p.id) > 0 {
            debug!(server_id = p.server_id, player_id = p.id, "player quit");
            Applied::Changed
        } else {
            Applied::Unchanged
        }
    }

    fn set_online(&mut self, server_id: ServerId, online: bool) -> Applied {
        let Some(srv) = self.servers.get_mut(&server_id) else {
            debug!(server_id, online, "status for unknown server");
            return Applied::Unchanged;
        };

        if srv.online == online {
            return Applied::Unchanged;
        }
        srv.online = online;
        info!(server_id, name = %srv.name, online, "server status changed");
        Applied::Changed
    }

    fn append_chat(&mut self, msg: ChatMessage) -> Applied {
        self.chat.entry(msg.server_id).or_default().push(msg);
        Applied::Changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::ServerStatus;

    fn empty_server(id: ServerId) -> ServerViewState {
        ServerViewState::new(id, format!("server-{id}"), "127.0.0.1:2302".into())
    }

    fn presence(server_id: ServerId, id: i64, name: &str) -> PlayerPresence {
        PlayerPresence {
            server_id,
            id,
            player_game_id: format!("game-{id}"),
            name: name.into(),
        }
    }

    fn join(server_id: ServerId, id: i64, name: &str) -> InboundEvent {
        InboundEvent::PlayerJoin(presence(server_id, id, name))
    }

    fn quit(server_id: ServerId, id: i64, name: &str) -> InboundEvent {
        InboundEvent::PlayerQuit(presence(server_id, id, name))
    }

    fn chat(server_id: ServerId, name: &str, message: &str) -> InboundEvent {
        InboundEvent::Chat(ChatMessage {
            server_id,
            name: name.into(),
            message: message.into(),
            timestamp: None,
        })
    }

    fn roster_ids(state: &LiveState, server_id: ServerId) -> Vec<i64> {
        state
            .server(server_id)
            .unwrap()
            .players()
            .iter()
            .map(|p| p.id)
            .collect()
    }

    #[test]
    fn test_join_join_quit_leaves_second_player() {
        let mut state = LiveState::new();
        state.load_snapshot([empty_server(1)]);

        for event in [join(1, 1, "p1"), join(1, 2, "p2"), quit(1, 1, "p1")] {
            state.apply(event);
        }
        assert_eq!(roster_ids(&state, 1), vec![2]);
    }

    #[test]
    fn test_repeated_join_keeps_one_entry() {
        let mut state = LiveState::new();
        state.load_snapshot([empty_server(1)]);

        assert_eq!(state.apply(join(1, 1, "p1")), Applied::Changed);
        assert_eq!(state.apply(join(1, 1, "p1")), Applied::Unchanged);
        assert_eq!(roster_ids(&state, 1), vec![1]);
    }

    #[test]
    fn test_repeated_join_with_new_name_updates_in_place() {
        let mut state = LiveState::new();
        state.load_snapshot([empty_server(1)]);

        state.apply(join(1, 1, "old"));
        state.apply(join(1, 2, "other"));
        assert_eq!(state.apply(join(1, 1, "new")), Applied::Changed);

        let srv = state.server(1).unwrap();
        assert_eq!(roster_ids(&state, 1), vec![1, 2]);
        assert_eq!(srv.players()[0].current_name, "new");
    }

    #[test]
    fn test_quit_for_absent_player_is_unchanged() {
        let mut state = LiveState::new();
        state.load_snapshot([empty_server(1)]);
        assert_eq!(state.apply(quit(1, 42, "ghost")), Applied::Unchanged);
    }

    #[test]
    fn test_chat_appends_in_order() {
        let mut state = LiveState::new();
        state.apply(chat(5, "alice", "hi"));
        state.apply(chat(5, "bob", "yo"));

        let log: Vec<_> = state
            .chat_log(5)
            .iter()
            .map(|m| (m.name.as_str(), m.message.as_str()))
            .collect();
        assert_eq!(log, vec![("alice", "hi"), ("bob", "yo")]);
        assert!(state.chat_log(6).is_empty());
    }

    #[test]
    fn test_unknown_server_status_is_noop() {
        let mut state = LiveState::new();
        state.load_snapshot([empty_server(1)]);
        let before = state.server(1).cloned();

        let applied = state.apply(InboundEvent::ServerOnline(ServerStatus { server_id: 999 }));
        assert_eq!(applied, Applied::Unchanged);
        assert_eq!(state.len(), 1);
        assert!(state.server(999).is_none());
        assert_eq!(state.server(1).cloned(), before);
    }

    #[test]
    fn test_join_for_unknown_server_is_noop() {
        let mut state = LiveState::new();
        assert_eq!(state.apply(join(3, 1, "p1")), Applied::Unchanged);
        assert!(state.is_empty());
    }

    #[test]
    fn test_online_offline_toggles() {
        let mut state = LiveState::new();
        state.load_snapshot([empty_server(1)]);

        let online = InboundEvent::ServerOnline(ServerStatus { server_id: 1 });
        let offline = InboundEvent::ServerOffline(ServerStatus { server_id: 1 });
        assert_eq!(state.apply(online.clone()), Applied::Changed);
        assert!(state.server(1).unwrap().online);
        assert_eq!(state.apply(online), Applied::Unchanged);
        assert_eq!(state.apply(offline), Applied::Changed);
        assert!(!state.server(1).unwrap().online);
    }

    #[test]
    fn test_unknown_event_is_ignored() {
        let mut state = LiveState::new();
        state.load_snapshot([empty_server(1)]);
        let applied = state.apply(InboundEvent::Unknown {
            kind: "infraction-create".into(),
        });
        assert_eq!(applied, Applied::Ignored);
        assert_eq!(state.server(1).unwrap().player_count(), 0);
    }

    #[test]
    fn test_online_join_quit_scenario() {
        let mut state = LiveState::new();
        state.load_snapshot([empty_server(1)]);

        let frames = [
            r#"{"type":"server-online","body":{"serverId":1}}"#,
            r#"{"type":"player-join","body":{"serverId":1,"id":7,"playerGameId":"abc","name":"X"}}"#,
            r#"{"type":"player-quit","body":{"serverId":1,"id":7,"playerGameId":"abc","name":"X"}}"#,
        ];
        for frame in frames {
            state.apply_frame(frame).unwrap();
        }

        let srv = state.server(1).unwrap();
        assert!(srv.online);
        assert!(srv.players().is_empty());
    }

    #[test]
    fn test_malformed_frame_leaves_state_alone() {
        let mut state = LiveState::new();
        state.load_snapshot([empty_server(1)]);
        state.apply(join(1, 1, "p1"));

        assert!(state.apply_frame("{").is_err());
        assert!(
            state
                .apply_frame(r#"{"type":"player-quit","body":{"serverId":1}}"#)
                .is_err()
        );
        assert_eq!(roster_ids(&state, 1), vec![1]);
    }

    #[test]
    fn test_snapshot_reload_replaces_views_and_keeps_chat() {
        let mut state = LiveState::new();
        state.load_snapshot([empty_server(1), empty_server(2)]);
        state.apply(join(1, 1, "p1"));
        state.apply(chat(1, "alice", "hi"));

        let reloaded = empty_server(1).with_players([PlayerRef {
            id: 9,
            player_game_id: "game-9".into(),
            current_name: "p9".into(),
        }]);
        state.load_snapshot([reloaded]);

        assert_eq!(state.len(), 1);
        assert_eq!(roster_ids(&state, 1), vec![9]);
        assert_eq!(state.chat_log(1).len(), 1);
    }

    #[test]
    fn test_servers_iterate_by_id() {
        let mut state = LiveState::new();
        state.load_snapshot([empty_server(3), empty_server(1), empty_server(2)]);
        let ids: Vec<_> = state.servers().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
