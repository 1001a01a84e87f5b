//! # Upstream Envelope Handling
//!
//! Upstream answers look like `{"result": true, "data": ...}`. Anything else
//! (a false `result`, a missing `data`, a non-array where a list is expected,
//! or plain garbage) is a [`SourceError`]; callers turn that into an empty
//! collection and keep going.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Why an upstream call produced nothing usable.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Http(#[from] anyhow::Error),

    #[error("upstream answered with HTTP status {0}")]
    Status(u16),

    #[error("envelope rejected: {0}")]
    Envelope(&'static str),

    #[error("payload is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Extracts the `data` member of a successful envelope.
pub fn unwrap_envelope(body: &str) -> Result<Value, SourceError> {
    let mut value: Value = serde_json::from_str(body)?;
    let Some(object) = value.as_object_mut() else {
        return Err(SourceError::Envelope("not an object"));
    };

    if object.get("result").and_then(Value::as_bool) != Some(true) {
        return Err(SourceError::Envelope("result is not true"));
    }

    object
        .remove("data")
        .ok_or(SourceError::Envelope("missing data"))
}

/// Decodes an enveloped list. Items that do not match `T` are skipped.
pub fn decode_envelope<T: DeserializeOwned>(body: &str) -> Result<Vec<T>, SourceError> {
    match unwrap_envelope(body)? {
        Value::Array(items) => Ok(decode_items(items)),
        _ => Err(SourceError::Envelope("data is not a list")),
    }
}

/// Parses a list that may arrive either enveloped or as a bare array.
pub fn parse_collection<T: DeserializeOwned>(body: &str) -> Result<Vec<T>, SourceError> {
    let value: Value = serde_json::from_str(body)?;
    match value {
        Value::Array(items) => Ok(decode_items(items)),
        Value::Object(_) => decode_envelope(body),
        _ => Err(SourceError::Envelope("neither a list nor an envelope")),
    }
}

/// Parses a number that may arrive bare (`1712345678000`) or enveloped.
pub fn parse_number(body: &str) -> Result<f64, SourceError> {
    let value: Value = serde_json::from_str(body)?;
    let number = match value {
        Value::Object(_) => unwrap_envelope(body)?,
        other => other,
    };
    number
        .as_f64()
        .filter(|n| n.is_finite())
        .ok_or(SourceError::Envelope("data is not a number"))
}

/// Enveloped list, or an empty one when the envelope is rejected.
pub fn parse_envelope<T: DeserializeOwned>(body: &str) -> Vec<T> {
    decode_envelope(body).unwrap_or_else(|e| {
        log::warn!("payload discarded: {}", e);
        Vec::new()
    })
}

/// Enveloped single object, or `None` when the envelope is rejected.
pub fn parse_envelope_single<T: DeserializeOwned>(body: &str) -> Option<T> {
    let data = match unwrap_envelope(body) {
        Ok(data) => data,
        Err(e) => {
            log::warn!("payload discarded: {}", e);
            return None;
        }
    };
    serde_json::from_value(data)
        .map_err(|e| log::warn!("payload discarded: {}", e))
        .ok()
}

fn decode_items<T: DeserializeOwned>(items: Vec<Value>) -> Vec<T> {
    let total = items.len();
    let decoded: Vec<T> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();
    if decoded.len() != total {
        log::debug!("skipped {} malformed item(s) of {}", total - decoded.len(), total);
    }
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::models::{ServerDescriptor, Train};

    #[test]
    fn valid_envelope_yields_items() {
        let body = r#"{"result":true,"data":[
            {"ServerCode":"en1","ServerName":"EN1","ServerRegion":"Europe","IsActive":true,"id":"x"}
        ]}"#;
        let servers: Vec<ServerDescriptor> = parse_envelope(body);
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].server_code, "en1");
        assert!(servers[0].is_active);
    }

    #[test]
    fn false_result_empty_object_and_garbage_give_empty_lists() {
        for body in [
            r#"{"result":false,"data":[{"ServerCode":"en1"}]}"#,
            "{}",
            "<html>502 Bad Gateway</html>",
            "",
            r#"{"result":true,"data":{"ServerCode":"en1"}}"#,
        ] {
            let servers: Vec<ServerDescriptor> = parse_envelope(body);
            assert!(servers.is_empty(), "body {body:?} produced items");
        }
    }

    #[test]
    fn malformed_items_are_skipped_not_fatal() {
        let body = r#"{"result":true,"data":[{"TrainNoLocal":"1"},{"TrainName":"no number"}]}"#;
        let trains: Vec<Train> = decode_envelope(body).unwrap();
        assert_eq!(trains.len(), 1);
        assert_eq!(trains[0].train_no_local, "1");
        assert!(trains[0].position().is_none());
    }

    #[test]
    fn train_coordinates_use_upstream_spelling() {
        let body = r#"{"result":true,"data":[{"TrainNoLocal":"446004","ServerCode":"en1","RunId":"r1",
            "TrainData":{"Latititute":50.1,"Longitute":19.9,"SignalInFront":"L1_2@x",
            "DistanceToSignalInFront":3.5,"SignalInFrontSpeed":60,"VDDelayedTimetableIndex":4}}]}"#;
        let trains: Vec<Train> = decode_envelope(body).unwrap();
        assert_eq!(trains[0].position(), Some((50.1, 19.9)));
        assert_eq!(trains[0].train_data.vd_delayed_timetable_index, 4);
        assert_eq!(trains[0].key().run_id, "r1");
    }

    #[test]
    fn single_objects_come_back_as_options() {
        let ok = r#"{"result":true,"data":{"ServerCode":"pl2"}}"#;
        let server: Option<ServerDescriptor> = parse_envelope_single(ok);
        assert_eq!(server.map(|s| s.server_code).as_deref(), Some("pl2"));

        let rejected: Option<ServerDescriptor> = parse_envelope_single(r#"{"result":false}"#);
        assert!(rejected.is_none());
        let wrong_shape: Option<ServerDescriptor> = parse_envelope_single(r#"{"result":true,"data":[]}"#);
        assert!(wrong_shape.is_none());
    }

    #[test]
    fn numbers_may_be_bare_or_enveloped() {
        assert_eq!(parse_number("1712345678000").unwrap(), 1712345678000.0);
        assert_eq!(parse_number(r#"{"result":true,"data":2}"#).unwrap(), 2.0);
        assert!(parse_number(r#"{"result":false,"data":2}"#).is_err());
        assert!(parse_number(r#""two""#).is_err());
    }

    #[test]
    fn collections_may_be_bare_arrays() {
        let items: Vec<u32> = parse_collection("[1,2,3]").unwrap();
        assert_eq!(items, vec![1, 2, 3]);
        assert!(parse_collection::<u32>(r#"{"result":false}"#).is_err());
    }
}
