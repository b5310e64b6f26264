//! Conversation history maintenance

use crate::ai::types::{Message, Role};

/// Bound `history` to `cap` messages
///
/// A leading system message always survives; the rest of the budget goes to
/// the most recent messages. Tool results whose assistant message was cut
/// off are dropped too, so every request stays well-formed.
pub fn trim_history(history: &mut Vec<Message>, cap: usize) {
    let cap = cap.max(1);
    if history.len() <= cap {
        return;
    }

    let has_system = history.first().map(|m| m.role == Role::System).unwrap_or(false);
    let keep_from = if has_system {
        // System + the most recent (cap - 1) others
        history.len() - (cap - 1)
    } else {
        history.len() - cap
    };

    let mut tail = history.split_off(keep_from);
    let orphaned = tail.iter().take_while(|m| m.role == Role::Tool).count();
    tail.drain(..orphaned);

    if has_system {
        history.truncate(1);
    } else {
        history.clear();
    }
    history.append(&mut tail);
}

/// Replace the leading system message, or insert one at the front
pub fn set_system_message(history: &mut Vec<Message>, content: &str) {
    match history.first_mut() {
        Some(first) if first.role == Role::System => first.content = content.to_string(),
        _ => history.insert(0, Message::system(content)),
    }
}
