//! C6: collapse prior turns into a single recap message, preserving the
//! last assistant message and per-tool persistent "state" fragments.

use crate::types::{AssistantMessage, ContentPart, Message};
use std::collections::HashMap;

/// Replaces `messages` with a two-message view: a synthetic user recap
/// plus the single most recent assistant message, if any. If there are
/// fewer than two assistant messages, the summary degenerates to the
/// original message list (invariant from spec §8.6).
pub fn summarize(task: &str, messages: &[Message]) -> Vec<Message> {
    let assistant_indices: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter_map(|(i, m)| match m {
            Message::Assistant(_) => Some(i),
            _ => None,
        })
        .collect();

    if assistant_indices.len() <= 1 {
        return messages.to_vec();
    }

    let last_idx = *assistant_indices.last().unwrap();
    let prior_assistants: Vec<&AssistantMessage> = assistant_indices[..assistant_indices.len() - 1]
        .iter()
        .map(|&i| messages[i].as_assistant().unwrap())
        .collect();

    let recap = build_recap(task, &prior_assistants);
    let mut out = vec![Message::user(recap)];
    out.push(messages[last_idx].clone());
    out
}

fn build_recap(task: &str, prior: &[&AssistantMessage]) -> String {
    let mut sections = Vec::new();
    sections.push(format!("## Task\n{}", task));

    for (turn_no, msg) in prior.iter().enumerate() {
        let mut block = vec![format!("### Turn {}", turn_no + 1)];
        for part in &msg.content {
            match part {
                ContentPart::Text(t) => block.push(format!("[assistant] {}", t.text)),
                ContentPart::ToolCall(tc) => {
                    block.push(format!(
                        "[tool_call] {}({})",
                        tc.name,
                        tc.arguments
                    ));
                    if let Some(result) = &tc.result {
                        block.push(format!(
                            "[tool_result] {}",
                            result.flattened_text()
                        ));
                    }
                }
            }
        }
        if let Some(err) = &msg.tool_error {
            block.push(format!("[error] {}", err));
        }
        sections.push(block.join("\n"));
    }

    if let Some(state) = collect_state(prior) {
        sections.push(state);
    }

    if let Some(history) = collect_history(prior) {
        sections.push(history);
    }

    sections.join("\n\n")
}

/// Union of `result._meta["dev.lowire/state"]` across all but the last
/// prior assistant message's tool results (the last is excluded since its
/// state is represented live in the `### Turn N` block instead).
fn collect_state(prior: &[&AssistantMessage]) -> Option<String> {
    if prior.is_empty() {
        return None;
    }
    // Union across every *prior* assistant message's tool results. The
    // live last assistant message is already excluded since it isn't part
    // of `prior` (it's rendered directly, not folded into this appendix).
    let mut merged: HashMap<String, HashMap<String, String>> = HashMap::new();
    for msg in prior {
        accumulate_state(msg, &mut merged);
    }

    if merged.is_empty() {
        return None;
    }
    let mut names: Vec<&String> = merged.keys().collect();
    names.sort();
    let rendered: Vec<String> = names
        .into_iter()
        .map(|name| {
            let kv = &merged[name];
            let mut keys: Vec<&String> = kv.keys().collect();
            keys.sort();
            let body = keys
                .into_iter()
                .map(|k| format!("{}: {}", k, kv[k]))
                .collect::<Vec<_>>()
                .join("\n");
            format!("### {}\n{}", name, body)
        })
        .collect();
    Some(rendered.join("\n\n"))
}

fn accumulate_state(
    msg: &AssistantMessage,
    merged: &mut HashMap<String, HashMap<String, String>>,
) {
    for part in &msg.content {
        if let ContentPart::ToolCall(tc) = part {
            if let Some(result) = &tc.result {
                if let Some(meta) = &result.meta {
                    if let Some(state) = &meta.state {
                        let entry = merged.entry(tc.name.clone()).or_default();
                        for (k, v) in state {
                            entry.insert(k.clone(), v.clone());
                        }
                    }
                }
            }
        }
    }
}

fn collect_history(prior: &[&AssistantMessage]) -> Option<String> {
    let mut lines = Vec::new();
    for msg in prior {
        for part in &msg.content {
            if let ContentPart::ToolCall(tc) = part {
                if let Some(result) = &tc.result {
                    if let Some(meta) = &result.meta {
                        if let Some(items) = &meta.history {
                            for item in items {
                                lines.push(format!("<{0}>{1}</{0}>", item.category, item.content));
                            }
                        }
                    }
                }
            }
        }
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AssistantMessage;

    #[test]
    fn fixed_point_with_at_most_one_assistant_message() {
        let messages = vec![Message::user("hi"), Message::Assistant(AssistantMessage::text_only("hello"))];
        let summarized = summarize("hi", &messages);
        assert_eq!(summarized.len(), messages.len());
    }

    #[test]
    fn collapses_multiple_turns_into_recap_plus_last() {
        let messages = vec![
            Message::user("do it"),
            Message::Assistant(AssistantMessage::text_only("turn one")),
            Message::Assistant(AssistantMessage::text_only("turn two")),
        ];
        let summarized = summarize("do it", &messages);
        assert_eq!(summarized.len(), 2);
        assert!(matches!(summarized[0], Message::User(_)));
        assert!(matches!(summarized[1], Message::Assistant(_)));
    }
}
