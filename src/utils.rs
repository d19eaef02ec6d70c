use std::borrow::Cow;

/// Generate a compact correlation ID (8 hex characters) from the first 4 bytes of a UUID v4.
///
/// One ID is assigned per accepted connection and carried on every event and
/// log line of that connection, so repeated attempts from one peer can be grouped.
pub fn generate_correlation_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    let bytes = uuid.as_bytes();
    format!(
        "{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3]
    )
}

/// Render peer-supplied text for the operator's console.
///
/// Credentials are forwarded to the collector verbatim; only the local log line
/// is escaped so control characters cannot rewrite the operator's terminal.
pub fn escape_for_log(value: &str) -> Cow<'_, str> {
    if value.chars().any(|c| c.is_control()) {
        Cow::Owned(value.escape_debug().to_string())
    } else {
        Cow::Borrowed(value)
    }
}
