//! Typed connectors for devices that do not push their own readings.
//!
//! Each device row names its connector kind; the polling loop turns that
//! into one of the closed variants below and calls [`Connector::fetch`].
//! Fetch results feed the same ingestion pipeline as pushed readings.

use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

use crate::models::{Device, SensorPayload};

/// Fallback ThingSpeak channel when the device name carries no override.
const DEFAULT_THINGSPEAK_CHANNEL: &str = "12397";

// ---

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("connector request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response shape: {0}")]
    Parse(String),
}

/// Closed set of external data sources.
#[derive(Debug, Clone, PartialEq)]
pub enum Connector {
    OpenMeteo { lat: f64, lon: f64 },
    ThingSpeak { channel_id: String },
}

impl Connector {
    /// Select the connector variant for a device, if it has one.
    ///
    /// Push-fed devices have no connector; a `thingspeak` device may carry a
    /// channel override in its name as `Channel:<id>`.
    pub fn for_device(device: &Device) -> Option<Connector> {
        // ---
        match device.connector_kind.as_str() {
            "open-meteo" => {
                let lat = device.lat?;
                let lon = device.lon?;
                Some(Connector::OpenMeteo { lat, lon })
            }
            "thingspeak" => {
                let channel_id = device
                    .name
                    .split_once("Channel:")
                    .map(|(_, id)| id.trim().to_string())
                    .unwrap_or_else(|| DEFAULT_THINGSPEAK_CHANNEL.to_string());
                Some(Connector::ThingSpeak { channel_id })
            }
            _ => None,
        }
    }

    /// Fetch one reading from the external source.
    pub async fn fetch(&self, client: &Client) -> Result<SensorPayload, FetchError> {
        // ---
        match self {
            Connector::OpenMeteo { lat, lon } => {
                let url = format!(
                    "https://api.open-meteo.com/v1/forecast?latitude={lat}&longitude={lon}\
                     &current=temperature_2m,relative_humidity_2m,surface_pressure,wind_speed_10m"
                );
                let body: Value = client.get(&url).send().await?.json().await?;
                parse_open_meteo(&body)
            }
            Connector::ThingSpeak { channel_id } => {
                let url = format!(
                    "https://api.thingspeak.com/channels/{channel_id}/feeds/last.json"
                );
                let body: Value = client.get(&url).send().await?.json().await?;
                parse_thingspeak(&body)
            }
        }
    }
}

// ---

fn parse_open_meteo(body: &Value) -> Result<SensorPayload, FetchError> {
    // ---
    let current = body
        .get("current")
        .ok_or_else(|| FetchError::Parse("missing 'current' block".to_string()))?;

    let field = |name: &str| -> Result<f64, FetchError> {
        current
            .get(name)
            .and_then(Value::as_f64)
            .ok_or_else(|| FetchError::Parse(format!("missing numeric '{name}'")))
    };

    Ok(SensorPayload {
        temperature: field("temperature_2m")?,
        humidity: field("relative_humidity_2m")?,
        pm25: 0.0,
        pressure: field("surface_pressure").unwrap_or(1013.0),
        mq_raw: 0.0,
        gas: 0.0,
        wind_speed: field("wind_speed_10m").unwrap_or(0.0),
        vibration: 0.0,
        uv_index: 0.0,
        rain: None,
        motion: None,
        ph: None,
        user_email: None,
        lat: None,
        lon: None,
        device_id: None,
    })
}

fn parse_thingspeak(body: &Value) -> Result<SensorPayload, FetchError> {
    // ---
    // ThingSpeak reports field values as strings.
    let field = |name: &str| -> Option<f64> {
        body.get(name)?.as_str()?.trim().parse::<f64>().ok()
    };

    let temperature = field("field1")
        .ok_or_else(|| FetchError::Parse("missing or non-numeric 'field1'".to_string()))?;
    let humidity = field("field2")
        .ok_or_else(|| FetchError::Parse("missing or non-numeric 'field2'".to_string()))?;

    Ok(SensorPayload {
        temperature,
        humidity,
        pm25: field("field3").unwrap_or(0.0),
        pressure: field("field4").unwrap_or(1013.0),
        mq_raw: 0.0,
        gas: field("field5").unwrap_or(0.0),
        wind_speed: 0.0,
        vibration: 0.0,
        uv_index: 0.0,
        rain: None,
        motion: None,
        ph: None,
        user_email: None,
        lat: None,
        lon: None,
        device_id: None,
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    fn polled_device(kind: &str, name: &str) -> Device {
        // ---
        let mut device = Device::new_push("poll-1");
        device.connector_kind = kind.to_string();
        device.name = name.to_string();
        device.lat = Some(17.38);
        device.lon = Some(78.48);
        device
    }

    #[test]
    fn connector_selection_follows_kind() {
        // ---
        let open_meteo = Connector::for_device(&polled_device("open-meteo", "City Station"));
        assert!(matches!(open_meteo, Some(Connector::OpenMeteo { .. })));

        let push = Connector::for_device(&polled_device("push", "ESP32 Unit"));
        assert!(push.is_none());
    }

    #[test]
    fn thingspeak_channel_override_comes_from_device_name() {
        // ---
        let connector =
            Connector::for_device(&polled_device("thingspeak", "Lab Feed Channel: 99123"));
        assert_eq!(
            connector,
            Some(Connector::ThingSpeak {
                channel_id: "99123".to_string()
            })
        );

        let fallback = Connector::for_device(&polled_device("thingspeak", "Lab Feed"));
        assert_eq!(
            fallback,
            Some(Connector::ThingSpeak {
                channel_id: DEFAULT_THINGSPEAK_CHANNEL.to_string()
            })
        );
    }

    #[test]
    fn open_meteo_response_parses_current_block() {
        // ---
        let body = json!({
            "current": {
                "temperature_2m": 29.4,
                "relative_humidity_2m": 61.0,
                "surface_pressure": 1006.2,
                "wind_speed_10m": 12.5
            }
        });
        let payload = parse_open_meteo(&body).unwrap();
        assert_eq!(payload.temperature, 29.4);
        assert_eq!(payload.humidity, 61.0);
        assert_eq!(payload.pressure, 1006.2);
        assert_eq!(payload.wind_speed, 12.5);
    }

    #[test]
    fn open_meteo_missing_current_is_a_parse_error() {
        // ---
        let result = parse_open_meteo(&json!({"hourly": {}}));
        assert!(matches!(result, Err(FetchError::Parse(_))));
    }

    #[test]
    fn thingspeak_string_fields_parse_to_floats() {
        // ---
        let body = json!({
            "field1": "24.8",
            "field2": "55.1",
            "field3": "18.0"
        });
        let payload = parse_thingspeak(&body).unwrap();
        assert_eq!(payload.temperature, 24.8);
        assert_eq!(payload.humidity, 55.1);
        assert_eq!(payload.pm25, 18.0);
        assert_eq!(payload.pressure, 1013.0);
    }

    #[test]
    fn thingspeak_garbage_field_is_a_parse_error() {
        // ---
        let body = json!({"field1": "n/a", "field2": "55.1"});
        assert!(matches!(
            parse_thingspeak(&body),
            Err(FetchError::Parse(_))
        ));
    }
}
