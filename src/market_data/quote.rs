use chrono::{DateTime, Local, TimeZone, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Serialize, Serializer};

/// Fractional digits every rendered price carries.
pub const PRICE_DECIMALS: u32 = 5;

// Matches the en-US `toLocaleString` shape, e.g. "12/16/2023, 10:30:00 AM".
const LOCAL_TIMESTAMP_FORMAT: &str = "%-m/%-d/%Y, %-I:%M:%S %p";

/// Latest accepted price/timestamp pair for the tracked instrument.
///
/// Both fields come from the same feed message; a `Quote` is never half-built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    price: Decimal,
    observed_at: DateTime<Utc>,
}

impl Quote {
    /// `None` when the price is too wide to keep `PRICE_DECIMALS` fraction digits.
    pub fn new(price: Decimal, observed_at: DateTime<Utc>) -> Option<Self> {
        Some(Self { price: round_price(price)?, observed_at })
    }

    /// Price already rounded to `PRICE_DECIMALS`.
    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    pub fn price_text(&self) -> String {
        self.price.to_string()
    }

    /// Feed timestamp rendered in the host's local time zone.
    pub fn observed_at_text(&self) -> String {
        render_timestamp(&self.observed_at.with_timezone(&Local))
    }
}

/// Round half away from zero to `PRICE_DECIMALS` and pin the scale so trailing
/// zeros survive formatting ("1.08" -> "1.08000").
pub fn round_price(price: Decimal) -> Option<Decimal> {
    let mut rounded = price.round_dp_with_strategy(PRICE_DECIMALS, RoundingStrategy::MidpointAwayFromZero);
    // rescale quietly settles for fewer digits when the mantissa would overflow
    rounded.rescale(PRICE_DECIMALS);
    if rounded.scale() != PRICE_DECIMALS {
        return None;
    }
    if rounded.is_zero() {
        rounded.set_sign_positive(true);
    }
    Some(rounded)
}

pub fn render_timestamp<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    at.format(LOCAL_TIMESTAMP_FORMAT).to_string()
}

/// What the host gets to see: the last quote (if any) and whether the feed is live.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedSnapshot {
    pub quote: Option<Quote>,
    pub connected: bool,
}

impl FeedSnapshot {
    pub fn price(&self) -> Option<String> {
        self.quote.as_ref().map(Quote::price_text)
    }

    pub fn observed_at(&self) -> Option<String> {
        self.quote.as_ref().map(Quote::observed_at_text)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QuoteView {
    price: Option<String>,
    observed_at: Option<String>,
}

#[derive(Serialize)]
struct SnapshotView {
    quote: QuoteView,
    connected: bool,
}

// Serialized as `{ quote: { price, observedAt }, connected }` with nulls before the first quote.
impl Serialize for FeedSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        SnapshotView {
            quote: QuoteView { price: self.price(), observed_at: self.observed_at() },
            connected: self.connected,
        }
        .serialize(serializer)
    }
}
