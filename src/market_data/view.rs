use std::fmt;

use crate::market_data::quote::FeedSnapshot;

pub const TITLE: &str = "EUR/USD Exchange Rate";
pub const PRICE_PLACEHOLDER: &str = "Loading...";
pub const TIMESTAMP_PLACEHOLDER: &str = "Waiting for data...";
pub const STATUS_LIVE: &str = "Live";
pub const STATUS_CONNECTING: &str = "Connecting...";

/// Text rendering of the ticker panel for one snapshot.
pub struct TickerView<'a> {
    snapshot: &'a FeedSnapshot,
}

impl<'a> TickerView<'a> {
    pub fn new(snapshot: &'a FeedSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn price_line(&self) -> String {
        match self.snapshot.price() {
            Some(price) => format!("${}", price),
            None => PRICE_PLACEHOLDER.to_string(),
        }
    }

    pub fn timestamp_line(&self) -> String {
        self.snapshot.observed_at().unwrap_or_else(|| TIMESTAMP_PLACEHOLDER.to_string())
    }

    pub fn status_line(&self) -> &'static str {
        if self.snapshot.connected { STATUS_LIVE } else { STATUS_CONNECTING }
    }
}

impl fmt::Display for TickerView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dot = if self.snapshot.connected { '●' } else { '○' };
        writeln!(f, "{}", TITLE)?;
        writeln!(f, "  {}", self.price_line())?;
        writeln!(f, "  {}", self.timestamp_line())?;
        write!(f, "  {} {}", dot, self.status_line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::feed::parse_tick;

    #[test]
    fn test_initial_render() {
        let snapshot = FeedSnapshot::default();
        let view = TickerView::new(&snapshot);
        assert_eq!(view.price_line(), "Loading...");
        assert_eq!(view.timestamp_line(), "Waiting for data...");
        assert_eq!(view.status_line(), "Connecting...");
        let text = view.to_string();
        assert!(text.starts_with("EUR/USD Exchange Rate\n"));
        assert!(text.ends_with("○ Connecting..."));
    }

    #[test]
    fn test_live_render_with_quote() {
        let quote = parse_tick(r#"{"price":"1.08456","dt":"2023-12-16T10:30:00Z"}"#).unwrap();
        let snapshot = FeedSnapshot { quote: Some(quote), connected: true };
        let view = TickerView::new(&snapshot);
        assert_eq!(view.price_line(), "$1.08456");
        assert!(!view.timestamp_line().is_empty());
        assert_ne!(view.timestamp_line(), TIMESTAMP_PLACEHOLDER);
        assert_eq!(view.status_line(), "Live");
    }

    #[test]
    fn test_stale_quote_while_reconnecting() {
        let quote = parse_tick(r#"{"price":"1.1","dt":"2023-12-16T10:30:00Z"}"#).unwrap();
        let snapshot = FeedSnapshot { quote: Some(quote), connected: false };
        let view = TickerView::new(&snapshot);
        assert_eq!(view.price_line(), "$1.10000");
        assert_eq!(view.status_line(), "Connecting...");
    }
}
