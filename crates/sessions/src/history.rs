//! History budget enforcement.
//!
//! After every mutation the store trims a session's history to the
//! configured `{max_messages, max_characters}` policy, dropping the
//! oldest user/assistant messages first. The last user message, the most
//! recent assistant message, and system messages are always retained.

use drost_domain::config::HistoryLimits;
use drost_domain::message::{HistoryMessage, Role};

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimReport {
    pub trimmed: bool,
    pub dropped_messages: usize,
    pub dropped_characters: usize,
}

pub fn trim_history(history: &mut Vec<HistoryMessage>, limits: &HistoryLimits) -> TrimReport {
    trim_history_collect(history, limits).0
}

/// Like [`trim_history`], but also returns the dropped messages so the
/// store can roll them into the session's full-history log.
pub fn trim_history_collect(
    history: &mut Vec<HistoryMessage>,
    limits: &HistoryLimits,
) -> (TrimReport, Vec<HistoryMessage>) {
    let mut report = TrimReport::default();
    let mut dropped = Vec::new();
    if limits.max_messages.is_none() && limits.max_characters.is_none() {
        return (report, dropped);
    }

    loop {
        let over_messages = limits
            .max_messages
            .map(|max| history.len() > max)
            .unwrap_or(false);
        let over_characters = limits
            .max_characters
            .map(|max| total_chars(history) > max)
            .unwrap_or(false);
        if !over_messages && !over_characters {
            break;
        }

        let Some(victim) = oldest_droppable(history) else {
            break;
        };
        let removed = history.remove(victim);
        report.trimmed = true;
        report.dropped_messages += 1;
        report.dropped_characters += removed.chars();
        dropped.push(removed);
    }

    (report, dropped)
}

fn total_chars(history: &[HistoryMessage]) -> usize {
    history.iter().map(|m| m.chars()).sum()
}

/// Index of the oldest message that may be dropped: not a system
/// message, not the last user message, not the most recent assistant
/// message.
fn oldest_droppable(history: &[HistoryMessage]) -> Option<usize> {
    let last_user = history.iter().rposition(|m| m.role == Role::User);
    let last_assistant = history.iter().rposition(|m| m.role == Role::Assistant);

    history.iter().enumerate().find_map(|(i, m)| {
        if m.role == Role::System {
            return None;
        }
        if Some(i) == last_user || Some(i) == last_assistant {
            return None;
        }
        Some(i)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(n: usize) -> Vec<HistoryMessage> {
        let mut h = Vec::new();
        for i in 0..n {
            h.push(HistoryMessage::user(format!("u{i}")));
            h.push(HistoryMessage::assistant(format!("a{i}")));
        }
        h
    }

    #[test]
    fn no_limits_no_trim() {
        let mut h = pairs(10);
        let report = trim_history(&mut h, &HistoryLimits::default());
        assert!(!report.trimmed);
        assert_eq!(h.len(), 20);
    }

    #[test]
    fn message_budget_drops_oldest_pairs() {
        let mut h = pairs(5);
        let limits = HistoryLimits {
            max_messages: Some(4),
            max_characters: None,
        };
        let report = trim_history(&mut h, &limits);
        assert!(report.trimmed);
        assert_eq!(h.len(), 4);
        assert_eq!(report.dropped_messages, 6);
        // The newest exchanges survive.
        assert_eq!(h.last().unwrap().content, "a4");
    }

    #[test]
    fn last_user_and_assistant_always_survive() {
        let mut h = vec![
            HistoryMessage::user("only user"),
            HistoryMessage::assistant("only assistant"),
        ];
        let limits = HistoryLimits {
            max_messages: Some(1),
            max_characters: None,
        };
        trim_history(&mut h, &limits);
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn character_budget_enforced() {
        let mut h = pairs(4); // 8 messages, 2 chars each = 16 chars
        let limits = HistoryLimits {
            max_messages: None,
            max_characters: Some(6),
        };
        let report = trim_history(&mut h, &limits);
        assert!(report.trimmed);
        assert!(total_chars(&h) <= 6 || h.len() == 2);
        assert!(report.dropped_characters > 0);
    }

    #[test]
    fn system_messages_are_preserved() {
        let mut h = vec![HistoryMessage::system("rules")];
        h.extend(pairs(3));
        let limits = HistoryLimits {
            max_messages: Some(3),
            max_characters: None,
        };
        trim_history(&mut h, &limits);
        assert!(h.iter().any(|m| m.role == Role::System));
    }
}
