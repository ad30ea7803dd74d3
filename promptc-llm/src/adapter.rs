//! Chat rendering of structured requests.
//!
//! Every field is framed by a `[[ ## name ## ]]` marker, both in the
//! prompt and in the expected completion. The completion ends with the
//! `[[ ## completed ## ]]` marker.

use promptc_common::{Demonstration, Example};
use promptc_core::signature::Signature;
use promptc_core::{LmError, LmRequest, LmResponse, LmResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::OnceLock;

const REASONING: &str = "reasoning";
const HINT: &str = "hint";
const COMPLETED: &str = "completed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    fn new(role: Role, content: String) -> Self {
        Self { role, content }
    }
}

fn marker_regex() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(r"\[\[ ## (\w+) ## \]\]").expect("marker pattern is valid"))
}

fn marker(name: &str) -> String {
    format!("[[ ## {} ## ]]", name)
}

/// Renders requests into chat messages and parses completions back.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatAdapter;

impl ChatAdapter {
    pub fn new() -> Self {
        Self
    }

    /// System prompt, one user/assistant pair per demo, then the inputs.
    pub fn format(&self, request: &LmRequest) -> Vec<ChatMessage> {
        let signature = request.signature.as_ref();
        let mut messages = Vec::with_capacity(2 + request.demos.len() * 2);
        messages.push(ChatMessage::new(Role::System, system_prompt(request)));

        for demo in &request.demos {
            messages.push(ChatMessage::new(
                Role::User,
                render_inputs(signature, &demo.inputs, None),
            ));
            messages.push(ChatMessage::new(
                Role::Assistant,
                render_demo_outputs(signature, demo, request.reasoning),
            ));
        }

        let mut user = render_inputs(signature, &request.inputs, request.hint.as_deref());
        user.push_str(&response_instructions(signature, request.reasoning));
        messages.push(ChatMessage::new(Role::User, user));
        messages
    }

    /// Extract every output field (and reasoning when requested) from a
    /// completion. The first occurrence of a marker wins.
    pub fn parse(&self, request: &LmRequest, completion: &str) -> LmResult<LmResponse> {
        let sections = split_sections(completion);
        let mut response = LmResponse::default();

        for name in request.signature.output_names() {
            match sections.get(name) {
                Some(value) => response.fields.insert(name.to_string(), value.clone()),
                None => {
                    return Err(LmError::InvalidResponse {
                        reason: format!("missing output field '{}'", name),
                    })
                }
            };
        }
        if request.reasoning {
            response.reasoning = sections.get(REASONING).cloned();
        }
        Ok(response)
    }
}

fn split_sections(completion: &str) -> BTreeMap<String, String> {
    let markers: Vec<(usize, usize, &str)> = marker_regex()
        .captures_iter(completion)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?;
            Some((whole.start(), whole.end(), name.as_str()))
        })
        .collect();

    let mut sections = BTreeMap::new();
    for (i, (_, end, name)) in markers.iter().enumerate() {
        if *name == COMPLETED {
            continue;
        }
        let stop = markers.get(i + 1).map(|m| m.0).unwrap_or(completion.len());
        sections
            .entry(name.to_string())
            .or_insert_with(|| completion[*end..stop].trim().to_string());
    }
    sections
}

fn system_prompt(request: &LmRequest) -> String {
    let signature = request.signature.as_ref();
    let mut prompt = String::from("Your input fields are:\n");
    let mut position = 1;
    for field in signature.input_fields() {
        let _ = write!(prompt, "{}. `{}`", position, field.name);
        if !field.description.is_empty() {
            let _ = write!(prompt, ": {}", field.description);
        }
        prompt.push('\n');
        position += 1;
    }
    if request.hint.is_some() {
        let _ = writeln!(prompt, "{}. `{}`: a hint towards the answer", position, HINT);
    }

    prompt.push_str("Your output fields are:\n");
    let mut position = 1;
    if request.reasoning {
        let _ = writeln!(prompt, "{}. `{}`: think step by step", position, REASONING);
        position += 1;
    }
    for field in signature.output_fields() {
        let _ = write!(prompt, "{}. `{}`", position, field.name);
        if !field.description.is_empty() {
            let _ = write!(prompt, ": {}", field.description);
        }
        prompt.push('\n');
        position += 1;
    }

    prompt.push_str(
        "All interactions will be structured in the following way, with the appropriate values filled in.\n\n",
    );
    let mut layout: Vec<&str> = signature.input_names().collect();
    if request.hint.is_some() {
        layout.push(HINT);
    }
    if request.reasoning {
        layout.push(REASONING);
    }
    layout.extend(signature.output_names());
    for name in layout {
        let _ = write!(prompt, "{}\n{{{}}}\n\n", marker(name), name);
    }
    let _ = write!(
        prompt,
        "{}\nIn adhering to this structure, your objective is: \n        {}",
        marker(COMPLETED),
        signature.instructions()
    );
    prompt
}

fn render_inputs(signature: &Signature, inputs: &Example, hint: Option<&str>) -> String {
    let mut rendered = String::new();
    for name in signature.input_names() {
        if let Some(value) = inputs.get(name) {
            let _ = write!(rendered, "{}\n{}\n\n", marker(name), value);
        }
    }
    if let Some(hint) = hint {
        let _ = write!(rendered, "{}\n{}\n\n", marker(HINT), hint);
    }
    rendered
}

fn render_demo_outputs(signature: &Signature, demo: &Demonstration, reasoning: bool) -> String {
    let mut rendered = String::new();
    if reasoning {
        if let Some(text) = &demo.reasoning {
            let _ = write!(rendered, "{}\n{}\n\n", marker(REASONING), text);
        }
    }
    for name in signature.output_names() {
        if let Some(value) = demo.outputs.get(name) {
            let _ = write!(rendered, "{}\n{}\n\n", marker(name), value);
        }
    }
    rendered.push_str(&marker(COMPLETED));
    rendered
}

fn response_instructions(signature: &Signature, reasoning: bool) -> String {
    let mut fields: Vec<String> = Vec::new();
    if reasoning {
        fields.push(format!("`{}`", marker(REASONING)));
    }
    fields.extend(signature.output_names().map(|name| format!("`{}`", marker(name))));

    let mut text = String::from("Respond with the corresponding output fields, starting with the field ");
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            text.push_str(", then ");
        }
        text.push_str(field);
    }
    let _ = write!(
        text,
        ", and then ending with the marker for `{}`.",
        marker(COMPLETED)
    );
    text
}
