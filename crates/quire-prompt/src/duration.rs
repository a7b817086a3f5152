//! Message duration filtering.
//!
//! A message's `duration` is the number of rounds it stays visible to the
//! model. Rounds are counted per message, walking backward from the newest
//! history entry: the newest is round 0, the one before it round 1, and so on.

use crate::types::AgentInstanceMessage;

/// Whether a message `rounds_from_current` rounds old is still visible.
pub fn is_visible(message: &AgentInstanceMessage, rounds_from_current: usize) -> bool {
    match message.duration {
        None => true,
        Some(duration) => rounds_from_current < duration as usize,
    }
}

/// Keep the messages still visible to the model, preserving order.
///
/// `messages` is history ordered oldest to newest, already excluding the
/// current user message.
pub fn filter_messages_by_duration(messages: &[AgentInstanceMessage]) -> Vec<AgentInstanceMessage> {
    let newest = messages.len().saturating_sub(1);
    let kept: Vec<AgentInstanceMessage> = messages
        .iter()
        .enumerate()
        .filter(|(index, message)| is_visible(message, newest - index))
        .map(|(_, message)| message.clone())
        .collect();

    if kept.len() != messages.len() {
        tracing::debug!(
            total = messages.len(),
            kept = kept.len(),
            "Expired messages filtered from model context"
        );
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> Vec<AgentInstanceMessage> {
        vec![
            AgentInstanceMessage::user("1", "first question"),
            AgentInstanceMessage::assistant("2", "first answer"),
            AgentInstanceMessage::user("3", "second question"),
            AgentInstanceMessage::assistant("4", "second answer"),
        ]
    }

    fn ids(messages: &[AgentInstanceMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_no_durations_is_identity() {
        let messages = history();
        assert_eq!(filter_messages_by_duration(&messages), messages);
        assert!(filter_messages_by_duration(&[]).is_empty());
    }

    #[test]
    fn test_duration_zero_never_survives() {
        for position in 0..4 {
            let mut messages = history();
            messages[position].duration = Some(0);
            let kept = filter_messages_by_duration(&messages);
            assert_eq!(kept.len(), 3);
            assert!(kept.iter().all(|m| m.id != messages[position].id));
        }
    }

    #[test]
    fn test_duration_one_survives_only_as_newest() {
        let mut messages = history();
        messages[3].duration = Some(1);
        assert_eq!(ids(&filter_messages_by_duration(&messages)), vec!["1", "2", "3", "4"]);

        let mut messages = history();
        messages[2].duration = Some(1);
        assert_eq!(ids(&filter_messages_by_duration(&messages)), vec!["1", "2", "4"]);
    }

    #[test]
    fn test_longer_duration_window() {
        let messages: Vec<_> = history().into_iter().map(|m| m.with_duration(2)).collect();
        assert_eq!(ids(&filter_messages_by_duration(&messages)), vec!["3", "4"]);
    }

    #[test]
    fn test_is_visible() {
        let always = AgentInstanceMessage::user("a", "x");
        assert!(is_visible(&always, 1000));

        let once = AgentInstanceMessage::user("b", "x").with_duration(1);
        assert!(is_visible(&once, 0));
        assert!(!is_visible(&once, 1));
    }
}
