//! Name and value validation for events and attributes
//!
//! Validation failures never throw. Each check returns an [`EventError`]
//! naming the synthetic error entry that replaces the offending attribute, so
//! callers always see feedback in the recorded event itself.

use super::{limit, AttributeValue};

/// Synthetic error entry for an invalid attribute name
pub const ERROR_NAME_INVALID: &str = "_error_name_invalid";
/// Synthetic error entry for an over-long attribute name
pub const ERROR_NAME_LENGTH_EXCEED: &str = "_error_name_length_exceed";
/// Synthetic error entry for an over-long attribute value
pub const ERROR_VALUE_LENGTH_EXCEED: &str = "_error_value_length_exceed";
/// Synthetic error entry for exceeding the attribute count limit
pub const ERROR_ATTRIBUTE_SIZE_EXCEED: &str = "_error_attribute_size_exceed";

/// A validation failure, carrying the error entry to substitute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventError {
    /// Key of the synthetic error entry
    pub error_key: &'static str,
    /// Truncated diagnostic message
    pub message: String,
}

impl EventError {
    fn new(error_key: &'static str, message: impl Into<String>) -> Self {
        Self {
            error_key,
            message: truncate(message.into()),
        }
    }
}

fn truncate(mut message: String) -> String {
    if message.len() > limit::MAX_LENGTH_OF_ERROR_VALUE {
        // Truncate on a char boundary at or below the limit
        let mut cut = limit::MAX_LENGTH_OF_ERROR_VALUE;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    message
}

/// Whether a name contains only letters, digits, and underscores and does
/// not start with a digit
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validate an event type name
pub fn check_event_type(event_type: &str) -> Option<EventError> {
    if event_type.len() > limit::MAX_EVENT_TYPE_LENGTH {
        tracing::error!(
            event_type,
            "Event name is too long, the max event type length is {} characters",
            limit::MAX_EVENT_TYPE_LENGTH
        );
        return Some(EventError::new(
            ERROR_NAME_LENGTH_EXCEED,
            format!("event name length is:({}) name is: {}", event_type.len(), event_type),
        ));
    }
    if !is_valid_name(event_type) {
        tracing::error!(
            event_type,
            "Event name can only contain letters, digits and underscores and must not start with a digit"
        );
        return Some(EventError::new(ERROR_NAME_INVALID, event_type));
    }
    None
}

/// Validate an event attribute against the per-event limits
pub fn check_attribute(
    current_number: usize,
    key: &str,
    value: &AttributeValue,
) -> Option<EventError> {
    check_with_limits(
        current_number,
        limit::MAX_NUM_OF_ATTRIBUTES,
        key,
        value.string_len(),
        limit::MAX_LENGTH_OF_VALUE,
    )
}

/// Validate a user attribute against the user-profile limits
pub fn check_user_attribute(
    current_number: usize,
    key: &str,
    value: &AttributeValue,
) -> Option<EventError> {
    check_with_limits(
        current_number,
        limit::MAX_NUM_OF_USER_ATTRIBUTES,
        key,
        value.string_len(),
        limit::MAX_LENGTH_OF_USER_VALUE,
    )
}

fn check_with_limits(
    current_number: usize,
    max_number: usize,
    key: &str,
    value_len: Option<usize>,
    max_value_len: usize,
) -> Option<EventError> {
    if current_number >= max_number {
        tracing::error!(
            key,
            "Reached the max number of attributes limit ({}), the attribute will not be recorded",
            max_number
        );
        return Some(EventError::new(
            ERROR_ATTRIBUTE_SIZE_EXCEED,
            format!("attribute name: {}", key),
        ));
    }
    if key.len() > limit::MAX_LENGTH_OF_NAME {
        tracing::error!(
            key,
            "Attribute name exceeds the max length of {}, the attribute will not be recorded",
            limit::MAX_LENGTH_OF_NAME
        );
        return Some(EventError::new(
            ERROR_NAME_LENGTH_EXCEED,
            format!("attribute name length is:({}) name is: {}", key.len(), key),
        ));
    }
    if !is_valid_name(key) {
        tracing::error!(
            key,
            "Attribute name can only contain letters, digits and underscores and must not start with a digit"
        );
        return Some(EventError::new(ERROR_NAME_INVALID, key));
    }
    if let Some(len) = value_len {
        if len > max_value_len {
            tracing::error!(
                key,
                value_length = len,
                "Attribute value exceeds the max length of {}, the attribute will not be recorded",
                max_value_len
            );
            return Some(EventError::new(
                ERROR_VALUE_LENGTH_EXCEED,
                format!("attribute name: {}, attribute value length: {}", key, len),
            ));
        }
    }
    None
}
