use serde_json::Value as JsonValue;
use thiserror::Error;

pub type Result<T, E = RpcBusError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RpcBusError {
    #[error("No handler is mapped to destination '{destination}'")]
    UnmappedDestination { destination: String },

    #[error("No argument resolver supports parameter {index} of type {type_name}")]
    UnsupportedParameter { index: usize, type_name: &'static str },

    #[error("No return value handler supports return type {type_name}")]
    UnsupportedReturnType { type_name: &'static str },

    /// Two different handlers claim the same destination.  Raised while building the registry,
    /// and fatal to initialization.
    #[error(
        "Ambiguous mapping: cannot map '{new_handler}' to '{destination}', \
         '{existing_handler}' is already mapped there"
    )]
    AmbiguousMapping {
        destination: String,
        existing_handler: String,
        new_handler: String,
    },

    #[error("Message headers are immutable; cannot modify header '{key}'")]
    FrozenHeaders { key: String },

    #[error("Missing required parameter '{name}'")]
    MissingParameter { name: String },

    #[error("Error deserializing parameter '{name}' as {type_name}")]
    DeserParam {
        source: serde_json::Error,
        name: String,
        type_name: &'static str,
        value: JsonValue,
    },

    #[error("Error serializing {type_name} to JSON")]
    SerResult {
        source: serde_json::Error,
        type_name: &'static str,
    },

    #[error("Invalid JSON-RPC request")]
    InvalidRequest {
        source: serde_json::Error,
        request: JsonValue,
    },

    #[error("Channel '{channel}' has been shut down")]
    ChannelClosed { channel: String },
}

/// Render the payload of a caught panic as something fit for a log line or an error message.
pub(crate) fn panic_err_to_string(err: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = err.downcast_ref::<&'static str>() {
        message.to_string()
    } else if let Some(message) = err.downcast_ref::<String>() {
        message.clone()
    } else {
        "Panic with a payload that is not a string".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_rendered() {
        let result = std::panic::catch_unwind(|| panic!("static message"));
        assert_eq!(panic_err_to_string(result.unwrap_err()), "static message");

        let value = 42;
        let result = std::panic::catch_unwind(|| panic!("formatted {value}"));
        assert_eq!(panic_err_to_string(result.unwrap_err()), "formatted 42");

        let result = std::panic::catch_unwind(|| std::panic::panic_any(17u32));
        assert_eq!(
            panic_err_to_string(result.unwrap_err()),
            "Panic with a payload that is not a string"
        );
    }
}
