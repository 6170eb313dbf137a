//! Sessions are not stored; they are rebuilt from the event stream per query.

use std::collections::HashMap;

use crate::event::{Event, EventKind};

/// Events sharing a session id, sorted by timestamp (stable for ties).
#[derive(Debug)]
pub struct SessionEvents<'a> {
    pub session_id: &'a str,
    pub events: Vec<&'a Event>,
}

impl<'a> SessionEvents<'a> {
    pub fn first(&self) -> Option<&'a Event> {
        self.events.first().copied()
    }

    pub fn heartbeats(&self) -> usize {
        self.events
            .iter()
            .filter(|e| e.kind == EventKind::Heartbeat)
            .count()
    }

    pub fn distinct_paths(&self) -> usize {
        let mut paths: Vec<&str> = self.events.iter().map(|e| e.path.as_str()).collect();
        paths.sort_unstable();
        paths.dedup();
        paths.len()
    }

    /// Exactly one distinct path and no heartbeat.
    pub fn is_bounce(&self) -> bool {
        self.distinct_paths() == 1 && self.heartbeats() == 0
    }

    pub fn entry_page(&self) -> Option<&'a str> {
        self.events
            .iter()
            .find(|e| e.kind == EventKind::Pageview)
            .map(|e| e.path.as_str())
    }

    pub fn exit_page(&self) -> Option<&'a str> {
        self.events
            .iter()
            .rev()
            .find(|e| e.kind == EventKind::Pageview)
            .map(|e| e.path.as_str())
    }

    pub fn has_custom_event(&self) -> bool {
        self.events.iter().any(|e| e.kind == EventKind::Custom)
    }
}

/// Group events by session id, in order of each session's first appearance.
pub fn group_sessions(events: &[Event]) -> Vec<SessionEvents<'_>> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut sessions: Vec<SessionEvents<'_>> = Vec::new();
    for event in events {
        let slot = *index.entry(event.session_id.as_str()).or_insert_with(|| {
            sessions.push(SessionEvents {
                session_id: event.session_id.as_str(),
                events: Vec::new(),
            });
            sessions.len() - 1
        });
        sessions[slot].events.push(event);
    }
    for session in &mut sessions {
        session.events.sort_by_key(|e| e.created_at);
    }
    sessions
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn ev(session: &str, kind: EventKind, path: &str, minute: u32) -> Event {
        let at = Utc
            .with_ymd_and_hms(2026, 1, 1, 12, minute, 0)
            .single()
            .expect("valid date");
        Event::new("p", kind, path, session, "v", at)
    }

    #[test]
    fn bounce_requires_single_path_and_no_heartbeat() {
        let events = vec![
            ev("a", EventKind::Pageview, "/", 0),
            ev("b", EventKind::Pageview, "/", 0),
            ev("b", EventKind::Pageview, "/about", 1),
            ev("c", EventKind::Pageview, "/", 0),
            ev("c", EventKind::Heartbeat, "/", 1),
            ev("d", EventKind::Pageview, "/", 0),
            ev("d", EventKind::Pageview, "/", 2),
        ];
        let sessions = group_sessions(&events);
        let bounced: Vec<&str> = sessions
            .iter()
            .filter(|s| s.is_bounce())
            .map(|s| s.session_id)
            .collect();
        assert_eq!(bounced, vec!["a", "d"]);
    }

    #[test]
    fn entry_and_exit_follow_timestamps_not_input_order() {
        let events = vec![
            ev("s", EventKind::Pageview, "/last", 30),
            ev("s", EventKind::Pageview, "/first", 1),
            ev("s", EventKind::Heartbeat, "/later", 40),
        ];
        let sessions = group_sessions(&events);
        assert_eq!(sessions[0].entry_page(), Some("/first"));
        assert_eq!(sessions[0].exit_page(), Some("/last"));
        assert_eq!(sessions[0].first().map(|e| e.path.as_str()), Some("/first"));
    }
}
