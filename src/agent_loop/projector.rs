//! Projects a stored thread into the message list sent to a provider.

use std::collections::HashMap;
use std::path::Path;

use crate::provider::{ProviderKind, ProviderMessage};
use crate::thread::Thread;
use crate::types::{Message, Role};

/// Synthetic result for a tool call whose result was never recorded.
pub const INTERRUPTED_RESULT: &str =
    "Error: tool call was interrupted before it produced a result.";

const DEFAULT_TOOL_GUIDANCE: &str = "You can call the web_fetch tool to read the text of a \
web page when the user refers to a URL or asks about something you need to look up.";

/// Assemble the system prompt for a thread. Empty when nothing applies.
pub fn system_prompt(thread: &Thread) -> String {
    let mut sections: Vec<String> = Vec::new();
    if let Some(custom) = thread.custom_system_prompt.as_deref() {
        let custom = custom.trim();
        if !custom.is_empty() {
            sections.push(custom.to_string());
        }
    }
    if thread.agent_enabled {
        sections.push(agent_instructions(thread.working_directory.as_deref()));
    } else {
        sections.push(DEFAULT_TOOL_GUIDANCE.to_string());
    }
    sections.join("\n\n")
}

fn agent_instructions(working_directory: Option<&Path>) -> String {
    let scope = match working_directory {
        Some(dir) => format!(
            "The working directory is {}. Relative paths are resolved against it, \
             and shell commands run there.",
            dir.display()
        ),
        None => "No working directory is set. Use absolute paths.".to_string(),
    };
    format!(
        "You can use tools to inspect and change files and to run shell commands. {scope}\n\
         Read a file before editing it. Prefer edit_file for small changes and write_file for new files. \
         write_file, edit_file and run_command may need the user's approval; if a call is denied, \
         do not retry it unchanged."
    )
}

/// Map a thread onto provider messages.
///
/// Every echoed tool call is followed by exactly one result, in call order.
/// Results that were never recorded are replaced by [`INTERRUPTED_RESULT`],
/// and results with no matching call are dropped. Passthrough providers keep
/// their own tool state, so their messages are sent as plain text.
pub fn project(thread: &Thread, provider_kind: ProviderKind) -> Vec<ProviderMessage> {
    let mut out = Vec::with_capacity(thread.messages.len() + 1);
    let prompt = system_prompt(thread);
    if !prompt.is_empty() {
        out.push(ProviderMessage::system(prompt));
    }

    if provider_kind == ProviderKind::Passthrough {
        out.extend(
            thread
                .messages
                .iter()
                .filter(|m| m.role != Role::Tool && !m.text.is_empty())
                .map(|m| ProviderMessage {
                    tool_calls: Vec::new(),
                    ..ProviderMessage::from(m)
                }),
        );
        return out;
    }

    let mut results: HashMap<&str, &Message> = HashMap::new();
    for message in thread.messages.iter().filter(|m| m.role == Role::Tool) {
        if let Some(id) = message.tool_call_id.as_deref() {
            results.entry(id).or_insert(message);
        }
    }

    for message in &thread.messages {
        match message.role {
            Role::Tool => {}
            Role::Assistant if message.is_empty_assistant() => {}
            Role::Assistant => {
                out.push(ProviderMessage::from(message));
                for call in &message.tool_calls {
                    match results.remove(call.id.as_str()) {
                        Some(result) => out.push(ProviderMessage::from(result)),
                        None => out.push(ProviderMessage::tool_result(
                            &call.id,
                            &call.name,
                            INTERRUPTED_RESULT,
                        )),
                    }
                }
            }
            _ => out.push(ProviderMessage::from(message)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ModelRef, ToolCall};
    use pretty_assertions::assert_eq;

    fn thread() -> Thread {
        Thread::new(ModelRef::new("openai", "gpt-4o"))
    }

    fn roles(messages: &[ProviderMessage]) -> Vec<Role> {
        messages.iter().map(|m| m.role).collect()
    }

    #[test]
    fn chat_mode_prompt_is_default_tool_guidance() {
        let thread = thread();
        assert_eq!(system_prompt(&thread), DEFAULT_TOOL_GUIDANCE);
    }

    #[test]
    fn custom_prompt_comes_first_separated_by_blank_line() {
        let thread = thread()
            .with_system_prompt("Answer in French.")
            .with_agent(Some("/work/repo".into()));
        let prompt = system_prompt(&thread);
        let (custom, rest) = prompt.split_once("\n\n").unwrap();
        assert_eq!(custom, "Answer in French.");
        assert!(rest.contains("The working directory is /work/repo."));
    }

    #[test]
    fn system_message_is_inserted_at_index_zero() {
        let mut thread = thread();
        thread.messages.push(Message::user("hi"));
        let projected = project(&thread, ProviderKind::Api);
        assert_eq!(roles(&projected), vec![Role::System, Role::User]);
    }

    #[test]
    fn tool_results_follow_their_calls_with_ids_and_signatures() {
        let mut thread = thread();
        let call = ToolCall::new("c1", "read_file", r#"{"path":"a"}"#).with_thought_signature("sig");
        let mut assistant = Message::assistant("");
        assistant.tool_calls.push(call.clone());
        thread.messages.push(Message::user("read a"));
        thread.messages.push(assistant);
        thread.messages.push(Message::tool_result(&call, "contents", false));

        let projected = project(&thread, ProviderKind::Api);
        assert_eq!(
            roles(&projected),
            vec![Role::System, Role::User, Role::Assistant, Role::Tool]
        );
        assert_eq!(
            projected[2].tool_calls[0].thought_signature.as_deref(),
            Some("sig")
        );
        assert_eq!(projected[3].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(projected[3].tool_name.as_deref(), Some("read_file"));
        assert_eq!(projected[3].text, "contents");
    }

    #[test]
    fn missing_results_are_synthesized_and_orphans_dropped() {
        let mut thread = thread();
        let first = ToolCall::new("c1", "read_file", "{}");
        let second = ToolCall::new("c2", "list_directory", "{}");
        let orphan = ToolCall::new("gone", "read_file", "{}");
        let mut assistant = Message::assistant("checking");
        assistant.tool_calls = vec![first.clone(), second.clone()];
        thread.messages.push(Message::tool_result(&orphan, "stale", false));
        thread.messages.push(assistant);
        thread.messages.push(Message::tool_result(&second, "listing", false));

        let projected = project(&thread, ProviderKind::Api);
        let tools: Vec<(&str, &str)> = projected
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| (m.tool_call_id.as_deref().unwrap(), m.text.as_str()))
            .collect();
        assert_eq!(tools, vec![("c1", INTERRUPTED_RESULT), ("c2", "listing")]);
    }

    #[test]
    fn empty_placeholder_assistant_messages_are_skipped() {
        let mut thread = thread();
        thread.messages.push(Message::user("hi"));
        thread.messages.push(Message::assistant(""));
        let projected = project(&thread, ProviderKind::Api);
        assert_eq!(roles(&projected), vec![Role::System, Role::User]);
    }

    #[test]
    fn passthrough_projection_drops_tool_traffic() {
        let mut thread = thread();
        let call = ToolCall::new("c1", "Bash", r#"{"command":"ls"}"#);
        let mut assistant = Message::assistant("ran ls");
        assistant.tool_calls.push(call);
        thread.messages.push(Message::user("list files"));
        thread.messages.push(assistant);

        let projected = project(&thread, ProviderKind::Passthrough);
        assert_eq!(
            roles(&projected),
            vec![Role::System, Role::User, Role::Assistant]
        );
        assert!(projected[2].tool_calls.is_empty());
    }
}
