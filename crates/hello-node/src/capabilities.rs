use an_node_sdk::{
    CapabilityDef, CapabilityGroup, CapabilityRegistry, HandlerError, HandlerResult,
    InvocationContext, SdkError,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct NameInput {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TextInput {
    text: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct EmojiResult {
    pub text: String,
    pub emoji: String,
}

fn name_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "name": { "type": "string", "minLength": 1 } },
        "required": ["name"]
    })
}

// ── Skill ───────────────────────────────────────────────────────────────

/// Greeting template.  Deterministic, no model involved.
pub fn get_greeting(input: Value) -> HandlerResult {
    let NameInput { name } = serde_json::from_value(input)?;
    Ok(json!({ "message": format!("Hello, {name}! Welcome to agentnode.") }))
}

// ── Reasoners ───────────────────────────────────────────────────────────

/// Decorate `text` with one emoji.
///
/// Stands in for a model call: the choice is a keyword lookup, made after
/// yielding to the runtime like a real remote call would.
pub async fn add_emoji(_ctx: InvocationContext, input: Value) -> HandlerResult {
    let TextInput { text } = serde_json::from_value(input)?;
    tokio::task::yield_now().await;

    let lower = text.to_lowercase();
    let emoji = [("welcome", "👋"), ("hello", "😊"), ("thanks", "🙏")]
        .iter()
        .find(|(kw, _)| lower.contains(kw))
        .map(|(_, e)| *e)
        .unwrap_or("✨");

    let result = EmojiResult {
        text: format!("{text} {emoji}"),
        emoji: emoji.to_string(),
    };
    serde_json::to_value(result).map_err(|e| HandlerError::failed(e.to_string()))
}

/// Entry point: greeting from the skill, decorated by the reasoner.
pub async fn say_hello(ctx: InvocationContext, input: Value) -> HandlerResult {
    let NameInput { name } = serde_json::from_value(input)?;

    let greeting = ctx.call("get_greeting", json!({ "name": name })).await?;
    let message = greeting["message"]
        .as_str()
        .ok_or_else(|| HandlerError::failed("get_greeting returned no message"))?;

    let decorated = ctx.call("add_emoji", json!({ "text": message })).await?;
    let EmojiResult { text, emoji } = serde_json::from_value(decorated)
        .map_err(|e| HandlerError::failed(format!("add_emoji: {e}")))?;

    Ok(json!({ "greeting": text, "emoji": emoji, "name": name }))
}

// ── Registration ────────────────────────────────────────────────────────

/// The `demo` namespace: `demo_hello` delegates to `say_hello`.
pub fn demo_group() -> CapabilityGroup {
    let mut demo = CapabilityGroup::new("demo");
    demo.add(
        CapabilityDef::reasoner("hello", |ctx: InvocationContext, input| async move {
            ctx.call("say_hello", input).await
        })
        .with_input_schema(name_schema()),
    );
    demo
}

/// Every capability this node exposes, in registration order.
pub fn registry() -> Result<CapabilityRegistry, SdkError> {
    let mut reg = CapabilityRegistry::new();

    reg.register_def(
        CapabilityDef::skill("get_greeting", get_greeting).with_input_schema(name_schema()),
    )?;
    reg.register_def(
        CapabilityDef::reasoner("add_emoji", add_emoji)
            .with_input_schema(json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }))
            .with_output_schema(json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" },
                    "emoji": { "type": "string" }
                },
                "required": ["text", "emoji"]
            })),
    )?;
    reg.register_def(
        CapabilityDef::reasoner("say_hello", say_hello)
            .with_input_schema(name_schema())
            .with_output_schema(json!({
                "type": "object",
                "required": ["greeting", "emoji", "name"]
            })),
    )?;
    demo_group().register_into(&mut reg)?;

    Ok(reg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use an_node_sdk::CapabilityKind;

    #[test]
    fn greeting_is_deterministic() {
        let a = get_greeting(json!({"name": "Alice"})).unwrap();
        let b = get_greeting(json!({"name": "Alice"})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a["message"], "Hello, Alice! Welcome to agentnode.");
    }

    #[test]
    fn greeting_rejects_missing_name() {
        let err = get_greeting(json!({})).unwrap_err();
        assert!(matches!(err, HandlerError::InvalidInput(_)));
    }

    #[test]
    fn registry_layout() {
        let reg = registry().unwrap();
        assert_eq!(reg.ids(), ["get_greeting", "add_emoji", "say_hello", "demo_hello"]);
        assert_eq!(reg.resolve("get_greeting").unwrap().kind(), CapabilityKind::Deterministic);
        assert_eq!(reg.resolve("say_hello").unwrap().kind(), CapabilityKind::Generative);
        assert_eq!(reg.resolve("demo_hello").unwrap().name, "hello");
    }
}
