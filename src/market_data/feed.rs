// Wire format of the streaming feed: the subscribe request we send and the ticks we accept.
// Source: tradingeconomics stream, e.g. {"s":"EURUSD:CUR","price":1.08456,"dt":1702722600000,...}

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;

use crate::market_data::quote::Quote;

pub const SUBSCRIBE_TOPIC: &str = "subscribe";

// zone-less date-times, read as UTC
const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];
// largest integer an f64 carries exactly
const MAX_EXACT_F64: f64 = 9_007_199_254_740_992.0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeedParseError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(String),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("missing or null field `{0}`")]
    MissingField(&'static str),
    #[error("price is not a decimal number: {0}")]
    InvalidPrice(String),
    #[error("timestamp is not a recognised instant: {0}")]
    InvalidTimestamp(String),
}

/// Text frame sent once after every successful open.
pub fn subscribe_message(instrument: &str) -> String {
    serde_json::json!({
        "topic": SUBSCRIBE_TOPIC,
        "to": instrument
    })
    .to_string()
}

/// Parse one inbound frame. Only `price` and `dt` matter; every other field is ignored.
pub fn parse_tick(raw: &str) -> Result<Quote, FeedParseError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| FeedParseError::Malformed(e.to_string()))?;
    let record = value.as_object().ok_or(FeedParseError::NotAnObject)?;

    let price = present(record.get("price")).ok_or(FeedParseError::MissingField("price"))?;
    let dt = present(record.get("dt")).ok_or(FeedParseError::MissingField("dt"))?;

    let price = parse_price(price)?;
    let observed_at = parse_timestamp(dt)?;
    Quote::new(price, observed_at).ok_or_else(|| FeedParseError::InvalidPrice(price.to_string()))
}

fn present(field: Option<&Value>) -> Option<&Value> {
    field.filter(|v| !v.is_null())
}

// number or numeric string; scientific notation is accepted since serde_json may emit it
fn parse_price(value: &Value) -> Result<Decimal, FeedParseError> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        other => return Err(FeedParseError::InvalidPrice(other.to_string())),
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| FeedParseError::InvalidPrice(text))
}

fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>, FeedParseError> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            parse_timestamp_text(s).ok_or_else(|| FeedParseError::InvalidTimestamp(s.to_string()))
        }
        // the live feed sends epoch milliseconds, occasionally as a whole-valued float
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|ms| ms.fract() == 0.0 && ms.abs() <= MAX_EXACT_F64).map(|ms| ms as i64))
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| FeedParseError::InvalidTimestamp(n.to_string())),
        other => Err(FeedParseError::InvalidTimestamp(other.to_string())),
    }
}

fn parse_timestamp_text(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(s) {
        return Some(at.with_timezone(&Utc));
    }
    // minutes precision with an explicit offset, e.g. 2023-12-16T11:30+01:00
    if let Ok(at) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M%:z") {
        return Some(at.with_timezone(&Utc));
    }
    let naive = s.strip_suffix('Z').or_else(|| s.strip_suffix('z')).unwrap_or(s);
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(naive, format).ok())
        .or_else(|| NaiveDate::parse_from_str(naive, "%Y-%m-%d").ok()?.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
