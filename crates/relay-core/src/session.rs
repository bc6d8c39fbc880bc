use sha2::{Digest, Sha256};

/// Derives the sticky-session hash for a request: an explicit client-supplied
/// session id (the `Session_id`/`Session-Id` header) wins if present, else
/// the system/instructions prompt, else the first input message's text —
/// first non-empty source wins. Always a 32-character lowercase hex string.
pub fn generate_session_hash(
    body: &serde_json::Value,
    session_id_header: Option<&str>,
) -> Option<String> {
    if let Some(explicit) = session_id_header {
        if !explicit.is_empty() {
            return Some(hash_content(explicit));
        }
    }

    if let Some(system) = body.get("system") {
        let text = extract_system_text(system);
        if !text.is_empty() {
            return Some(hash_content(&text));
        }
    }

    if let Some(instructions) = body.get("instructions").and_then(|v| v.as_str()) {
        if !instructions.is_empty() {
            return Some(hash_content(instructions));
        }
    }

    if let Some(text) = first_message_text(body, "messages") {
        return Some(hash_content(&text));
    }

    if let Some(text) = first_message_text(body, "input") {
        return Some(hash_content(&text));
    }

    None
}

/// Pulls the text of the first entry of a messages-shaped array field
/// (`messages` for Claude/OpenAI, `input` for the Responses API).
fn first_message_text(body: &serde_json::Value, field: &str) -> Option<String> {
    let first = body.get(field).and_then(|m| m.as_array())?.first()?;
    let text = extract_message_text(first);
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn extract_system_text(system: &serde_json::Value) -> String {
    if let Some(text) = system.as_str() {
        return text.to_string();
    }

    if let Some(parts) = system.as_array() {
        return parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("");
    }

    String::new()
}

fn extract_message_text(msg: &serde_json::Value) -> String {
    if let Some(content) = msg.get("content") {
        if let Some(text) = content.as_str() {
            return text.to_string();
        }

        if let Some(parts) = content.as_array() {
            return parts
                .iter()
                .filter_map(|p| {
                    if p.get("type").and_then(|t| t.as_str()) == Some("text") {
                        p.get("text").and_then(|t| t.as_str())
                    } else {
                        None
                    }
                })
                .collect::<Vec<_>>()
                .join("");
        }
    }

    String::new()
}

fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_content() {
        let hash = hash_content("test content");
        assert_eq!(hash.len(), 32);
    }

    #[test]
    fn test_session_hash_from_header_override() {
        let body = json!({ "system": "You are a helpful assistant." });
        let hash = generate_session_hash(&body, Some("client-session-42"));
        assert!(hash.is_some());
        let hash = hash.unwrap();
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        // The header wins over the system prompt, so it must differ from the
        // hash the system prompt alone would produce.
        assert_ne!(hash, generate_session_hash(&body, None).unwrap());
    }

    #[test]
    fn test_session_hash_header_is_deterministic() {
        let body = json!({});
        let a = generate_session_hash(&body, Some("same-id"));
        let b = generate_session_hash(&body, Some("same-id"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_session_hash_from_system() {
        let body = json!({
            "system": "You are a helpful assistant."
        });
        let hash = generate_session_hash(&body, None);
        assert!(hash.is_some());
        assert_eq!(hash.unwrap().len(), 32);
    }

    #[test]
    fn test_session_hash_from_instructions_when_no_system() {
        let body = json!({ "instructions": "Be concise." });
        let hash = generate_session_hash(&body, None);
        assert!(hash.is_some());
        assert_eq!(hash.unwrap().len(), 32);
    }

    #[test]
    fn test_session_hash_falls_back_to_first_input_message() {
        let body = json!({ "input": [{"role": "user", "content": "hello there"}] });
        let hash = generate_session_hash(&body, None);
        assert!(hash.is_some());
        assert_eq!(hash.unwrap().len(), 32);
    }

    #[test]
    fn test_session_hash_none_when_nothing_to_derive_from() {
        let body = json!({});
        assert_eq!(generate_session_hash(&body, None), None);
    }
}
