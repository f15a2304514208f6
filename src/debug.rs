use crate::protocol::ProtocolMessage;
use crate::values::PayloadValue;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};

static DEBUG_MODE: AtomicBool = AtomicBool::new(false);
static TRACE_MODE: AtomicBool = AtomicBool::new(false);

/// Initialize diagnostics from environment variables
///
/// - `SPATIAL_LINK_DEBUG=1`: Enable JSON pretty-printing of all messages
/// - `SPATIAL_LINK_TRACE=1`: Enable human-readable trace logging of operations
pub fn init_debug_mode() {
    let debug = env::var("SPATIAL_LINK_DEBUG").is_ok();
    let trace = env::var("SPATIAL_LINK_TRACE").is_ok();

    DEBUG_MODE.store(debug, Ordering::Relaxed);
    TRACE_MODE.store(trace, Ordering::Relaxed);

    if debug {
        eprintln!("[SPATIAL-LINK] Debug mode enabled - all messages will be logged as JSON");
    }

    if trace {
        eprintln!("[SPATIAL-LINK] Trace mode enabled - human-readable operation logs");
    }
}

/// Enable or disable verbose diagnostics directly (host-supplied flag).
pub fn set_verbose(enabled: bool) {
    DEBUG_MODE.store(enabled, Ordering::Relaxed);
    TRACE_MODE.store(enabled, Ordering::Relaxed);
}

pub fn is_debug_enabled() -> bool {
    DEBUG_MODE.load(Ordering::Relaxed)
}

pub fn is_trace_enabled() -> bool {
    TRACE_MODE.load(Ordering::Relaxed)
}

/// Log a protocol message in JSON form if debug mode is enabled
pub fn log_message(direction: &str, message: &ProtocolMessage) {
    if !is_debug_enabled() {
        return;
    }

    match serde_json::to_string_pretty(message) {
        Ok(json) => {
            eprintln!("\n[SPATIAL-LINK] {} Message:\n{}\n", direction, json);
        }
        Err(e) => {
            eprintln!("[SPATIAL-LINK] Failed to serialize message to JSON: {}", e);
        }
    }
}

/// Trace a property write on the outbound path
pub fn trace_property(key: &str, value: &PayloadValue) {
    if !is_trace_enabled() {
        return;
    }

    eprintln!("[SPATIAL-LINK] Property '{}' = {:?}", key, value);
}

/// Diagnostic for the lossy dot-to-dash escape in property names
pub fn trace_property_escape(property: &str) {
    if !is_trace_enabled() {
        return;
    }

    eprintln!(
        "[SPATIAL-LINK] Property name '{}' contains '.', escaping to '-' (lossy)",
        property
    );
}

/// Diagnostic for the same escape applied to object labels
pub fn trace_label_escape(label: &str) {
    if !is_trace_enabled() {
        return;
    }

    eprintln!(
        "[SPATIAL-LINK] Object label '{}' contains '.', escaping to '-' (lossy)",
        label
    );
}

/// Trace anchor find/save/delete operations
pub fn trace_find(detail: &str) {
    if !is_trace_enabled() {
        return;
    }

    eprintln!("[SPATIAL-LINK] Anchor: {}", detail);
}

/// Trace watcher lifecycle changes
pub fn trace_watcher(detail: &str) {
    if !is_trace_enabled() {
        return;
    }

    eprintln!("[SPATIAL-LINK] Watcher: {}", detail);
}

/// Trace replay progress during a rejoin
pub fn trace_replay(detail: &str) {
    if !is_trace_enabled() {
        return;
    }

    eprintln!("[SPATIAL-LINK] Replay: {}", detail);
}

/// Create a one-line summary of a message
pub fn message_summary(message: &ProtocolMessage) -> String {
    format!(
        "{:?} ({:?}, {} bytes)",
        message.message_type,
        message.data.data_type(),
        message.byte_size()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;

    #[test]
    fn test_debug_mode_initialization() {
        // Should not crash without env vars
        init_debug_mode();
    }

    #[test]
    fn test_message_summary() {
        let message = ProtocolMessage::new(MessageType::PropertyChanged, PayloadValue::Float(3.5));
        let summary = message_summary(&message);
        assert!(summary.contains("PropertyChanged"));
        assert!(summary.contains("Float"));
    }
}
