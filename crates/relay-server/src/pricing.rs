use bytes::Bytes;
use regex::Regex;
use relay_core::UsageEvent;
use std::sync::OnceLock;

/// Every integer token-count field name used across the adapters' usage
/// objects (Claude/Bedrock, Gemini, OpenAI Chat, Codex Responses).
const TOKEN_FIELDS: &[&str] = &[
    "input_tokens",
    "output_tokens",
    "cache_creation_input_tokens",
    "cache_read_input_tokens",
    "prompt_tokens",
    "completion_tokens",
    "total_tokens",
    "cached_tokens",
    "prompt_token_count",
    "candidates_token_count",
    "total_token_count",
];

fn token_field_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternation = TOKEN_FIELDS.join("|");
        Regex::new(&format!(r#""({alternation})"\s*:\s*(\d+)"#)).expect("static pattern")
    })
}

/// Multiplies every token count on a usage event by `price_rate` before it
/// is billed or echoed back to the client. `price_rate` of 1.0 is a no-op;
/// values are rounded to the nearest whole token.
pub fn rewrite_usage(mut usage: UsageEvent, price_rate: f64) -> UsageEvent {
    if (price_rate - 1.0).abs() < f64::EPSILON {
        return usage;
    }

    usage.input_tokens = scale(usage.input_tokens, price_rate);
    usage.output_tokens = scale(usage.output_tokens, price_rate);
    usage.cache_creation_input_tokens = scale(usage.cache_creation_input_tokens, price_rate);
    usage.cache_read_input_tokens = scale(usage.cache_read_input_tokens, price_rate);
    usage
}

fn scale(tokens: u32, rate: f64) -> u32 {
    ((tokens as f64) * rate).round().max(0.0) as u32
}

/// Rewrites every token-count field embedded in `text` (an SSE payload or a
/// unary JSON body) by `price_rate`, leaving everything else byte-for-byte
/// unchanged. This is the client-visible counterpart to [`rewrite_usage`],
/// which only ever touches the recorded billing row.
pub fn rewrite_token_fields(text: &str, price_rate: f64) -> String {
    if (price_rate - 1.0).abs() < f64::EPSILON {
        return text.to_string();
    }

    token_field_regex()
        .replace_all(text, |caps: &regex::Captures| {
            let field = &caps[1];
            let value: u64 = caps[2].parse().unwrap_or(0);
            let scaled = ((value as f64) * price_rate).round().max(0.0) as u64;
            format!("\"{field}\":{scaled}")
        })
        .into_owned()
}

/// Byte-oriented variant of [`rewrite_token_fields`] for SSE chunks. Falls
/// back to the original bytes if a chunk isn't valid UTF-8, which never
/// happens for real SSE frames but avoids a panic on malformed input.
pub fn rewrite_sse_bytes(bytes: Bytes, price_rate: f64) -> Bytes {
    if (price_rate - 1.0).abs() < f64::EPSILON {
        return bytes;
    }

    match std::str::from_utf8(&bytes) {
        Ok(text) => Bytes::from(rewrite_token_fields(text, price_rate)),
        Err(_) => bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(input: u32, output: u32) -> UsageEvent {
        UsageEvent {
            account_id: "acc-1".to_string(),
            model: "claude-3-5-sonnet".to_string(),
            input_tokens: input,
            output_tokens: output,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: 0,
        }
    }

    #[test]
    fn identity_rate_is_a_no_op() {
        let rewritten = rewrite_usage(usage(100, 50), 1.0);
        assert_eq!(rewritten.input_tokens, 100);
        assert_eq!(rewritten.output_tokens, 50);
    }

    #[test]
    fn rate_above_one_scales_up() {
        let rewritten = rewrite_usage(usage(100, 50), 2.0);
        assert_eq!(rewritten.input_tokens, 200);
        assert_eq!(rewritten.output_tokens, 100);
    }

    #[test]
    fn rate_below_one_scales_down_and_rounds() {
        let rewritten = rewrite_usage(usage(3, 5), 0.5);
        assert_eq!(rewritten.input_tokens, 2);
        assert_eq!(rewritten.output_tokens, 3);
    }

    #[test]
    fn token_fields_identity_rate_is_a_no_op() {
        let text = r#"{"usage":{"input_tokens":100,"output_tokens":50}}"#;
        assert_eq!(rewrite_token_fields(text, 1.0), text);
    }

    #[test]
    fn token_fields_rewritten_leaves_other_numbers_alone() {
        let text = r#"{"id":"msg_1","usage":{"input_tokens":100,"output_tokens":50},"index":3}"#;
        let rewritten = rewrite_token_fields(text, 2.0);
        assert_eq!(
            rewritten,
            r#"{"id":"msg_1","usage":{"input_tokens":200,"output_tokens":100},"index":3}"#
        );
    }

    #[test]
    fn token_fields_cover_gemini_and_openai_names() {
        let text = r#"{"prompt_tokens":10,"completion_tokens":20,"prompt_token_count":5,"candidates_token_count":7,"cached_tokens":2}"#;
        let rewritten = rewrite_token_fields(text, 10.0);
        assert!(rewritten.contains("\"prompt_tokens\":100"));
        assert!(rewritten.contains("\"completion_tokens\":200"));
        assert!(rewritten.contains("\"prompt_token_count\":50"));
        assert!(rewritten.contains("\"candidates_token_count\":70"));
        assert!(rewritten.contains("\"cached_tokens\":20"));
    }

    #[test]
    fn sse_bytes_rewrite_roundtrips_through_bytes() {
        let chunk = Bytes::from_static(br#"data: {"usage":{"output_tokens":4}}"#);
        let rewritten = rewrite_sse_bytes(chunk, 2.5);
        assert_eq!(&rewritten[..], br#"data: {"usage":{"output_tokens":10}}"#);
    }
}
