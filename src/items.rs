use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parameters of an action or function call, forwarded verbatim to the surface.
pub type Params = Map<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Developer,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// All text carried by the content, parts joined with newlines.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|p| p.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: String,
    // annotations, logprobs, ... echoed back untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self { kind: None, text: text.into(), extra: Map::new() }
    }
}

/// A named operation against the target surface. The dispatcher only reads `name`;
/// everything else travels to the surface as-is.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub name: String,
    #[serde(flatten)]
    pub params: Params,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SafetyCheck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Screenshot payload returned for a computer call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComputerScreenshot {
    #[serde(rename = "type")]
    pub kind: String,
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_metadata: Option<PageMetadata>,
}

impl ComputerScreenshot {
    pub fn png(image_base64: &str) -> Self {
        Self {
            kind: "input_image".into(),
            image_url: format!("data:image/png;base64,{image_base64}"),
            current_url: None,
            page_metadata: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SummaryPart {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: String,
}

/// One unit of conversation, from the user, the service, or synthesized locally.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Item {
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        role: Role,
        content: MessageContent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    FunctionCall {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        name: String,
        arguments: String,
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
    ComputerCall {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        call_id: String,
        action: Action,
        #[serde(default)]
        pending_safety_checks: Vec<SafetyCheck>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    ComputerCallOutput {
        call_id: String,
        #[serde(default)]
        acknowledged_safety_checks: Vec<SafetyCheck>,
        output: ComputerScreenshot,
    },
    Reasoning {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default)]
        summary: Vec<SummaryPart>,
        // encrypted_content and friends must be replayed as received
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    /// Terminal marker injected when the action ceiling is hit. Never sent to the service.
    #[serde(rename = "max-actions")]
    ActionLimitReached {
        role: Role,
        content: MessageContent,
    },
    /// Any item type this crate does not interpret, kept verbatim so it can be replayed.
    #[serde(untagged)]
    Unknown(Value),
}

impl Item {
    pub fn user(text: impl Into<String>) -> Self {
        Item::Message {
            id: None,
            role: Role::User,
            content: MessageContent::Text(text.into()),
            status: None,
        }
    }

    pub fn action_limit(max_actions: usize) -> Self {
        let text = format!(
            "Reached the configured maximum of {max_actions} actions without a final assistant response. Stopping further processing."
        );
        Item::ActionLimitReached {
            role: Role::Assistant,
            content: MessageContent::Parts(vec![ContentPart::text(text)]),
        }
    }

    /// Wire name of the item type, as it appears in the `type` field.
    pub fn kind(&self) -> &str {
        match self {
            Item::Message { .. } => "message",
            Item::FunctionCall { .. } => "function_call",
            Item::FunctionCallOutput { .. } => "function_call_output",
            Item::ComputerCall { .. } => "computer_call",
            Item::ComputerCallOutput { .. } => "computer_call_output",
            Item::Reasoning { .. } => "reasoning",
            Item::ActionLimitReached { .. } => "max-actions",
            Item::Unknown(raw) => raw.get("type").and_then(Value::as_str).unwrap_or("unknown"),
        }
    }

    pub fn is_assistant_message(&self) -> bool {
        matches!(self, Item::Message { role: Role::Assistant, .. })
    }

    /// Items that only exist on this side of the wire.
    pub fn is_local(&self) -> bool {
        matches!(self, Item::ActionLimitReached { .. })
    }

    /// JSON form with screenshot payloads elided, for debug output.
    pub fn sanitized(&self) -> Value {
        let mut v = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Item::ComputerCallOutput { .. } = self {
            if let Some(url) = v.pointer_mut("/output/image_url") {
                *url = Value::String("[omitted]".into());
            }
        }
        v
    }
}
