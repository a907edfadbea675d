//! JSON encoding of bus payloads.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::bus::MessageBus;
use crate::error::BusError;

/// Serialize a message body.
///
/// # Errors
///
/// Returns [`BusError::MalformedMessage`] if serialization fails.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, BusError> {
    serde_json::to_vec(message)
        .map_err(|e| BusError::MalformedMessage(format!("failed to serialize message: {e}")))
}

/// Deserialize a message body.
///
/// # Errors
///
/// Returns [`BusError::MalformedMessage`] if the payload does not decode
/// as `T`.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, BusError> {
    serde_json::from_slice(payload)
        .map_err(|e| BusError::MalformedMessage(format!("failed to deserialize message: {e}")))
}

/// Serialize `message` and publish it on `queue`.
///
/// # Errors
///
/// Returns [`BusError::MalformedMessage`] on serialization failure, or the
/// adapter's publish error.
pub async fn publish_json<T: Serialize + Sync>(
    bus: &dyn MessageBus,
    queue: &str,
    message: &T,
) -> Result<(), BusError> {
    let payload = encode(message)?;
    bus.publish(queue, payload).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use daws_types::{ControllerId, ControllerReport, Domain};

    use super::*;

    #[test]
    fn garbage_is_malformed() {
        let result: Result<ControllerReport, _> = decode(b"{not json");
        assert!(matches!(result, Err(BusError::MalformedMessage(_))));
    }

    #[test]
    fn report_survives_the_wire() {
        let report = ControllerReport::exit(ControllerId::new(), Domain::Traffic);
        let back: ControllerReport = decode(&encode(&report).unwrap()).unwrap();
        assert_eq!(back, report);
    }
}
