//! Server-Sent-Events framing detection and message extraction (spec §4.3).

/// A body is SSE if any line, once trimmed, begins with one of the SSE field names.
pub fn is_sse(body: &str) -> bool {
    body.lines().any(|line| {
        let trimmed = line.trim_start();
        trimmed.starts_with("event:")
            || trimmed.starts_with("data:")
            || trimmed.starts_with("id:")
            || trimmed.starts_with("retry:")
    })
}

/// Splits an SSE stream into messages, concatenating each message's `data:` lines
/// (newline-joined) and ignoring any other field. Messages are separated by blank
/// lines; a trailing message with no terminating blank line is still emitted.
/// Malformed lines (no recognized field prefix) are ignored rather than failing
/// the whole parse.
pub fn extract_data_messages(body: &str) -> Vec<String> {
    let mut messages = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() {
            if !current.is_empty() {
                messages.push(current.join("\n"));
                current.clear();
            }
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("data:") {
            current.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
        // event:/id:/retry: lines and anything else are recognized framing but
        // carry no payload data for our purposes; silently skipped.
    }
    if !current.is_empty() {
        messages.push(current.join("\n"));
    }
    messages
}

/// Re-serializes messages back into an SSE stream, for the round-trip law in spec §8:
/// parsing a body built this way from a parser's own output must reproduce the same
/// messages.
pub fn to_sse_stream(messages: &[String]) -> String {
    let mut out = String::new();
    for message in messages {
        for line in message.lines() {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_sse_from_data_line() {
        assert!(is_sse("data: {\"a\":1}\n\n"));
        assert!(!is_sse("{\"a\":1}"));
    }

    #[test]
    fn splits_messages_on_blank_lines() {
        let body = "data: {\"a\":1}\n\ndata: {\"b\":2}\n\n";
        let messages = extract_data_messages(body);
        assert_eq!(messages, vec!["{\"a\":1}".to_string(), "{\"b\":2}".to_string()]);
    }

    #[test]
    fn trailing_message_without_blank_line_is_emitted() {
        let body = "data: {\"a\":1}\n\ndata: {\"b\":2}";
        let messages = extract_data_messages(body);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1], "{\"b\":2}");
    }

    #[test]
    fn multiline_data_within_one_message_is_newline_joined() {
        let body = "data: line1\ndata: line2\n\n";
        let messages = extract_data_messages(body);
        assert_eq!(messages, vec!["line1\nline2".to_string()]);
    }

    #[test]
    fn ignores_malformed_lines() {
        let body = "not-a-field\ndata: {\"a\":1}\n\n";
        let messages = extract_data_messages(body);
        assert_eq!(messages, vec!["{\"a\":1}".to_string()]);
    }

    #[test]
    fn round_trips_through_to_sse_stream() {
        let body = "data: {\"a\":1}\n\ndata: {\"b\":2}\n\n";
        let messages = extract_data_messages(body);
        let rebuilt = to_sse_stream(&messages);
        let reparsed = extract_data_messages(&rebuilt);
        assert_eq!(messages, reparsed);
    }
}
