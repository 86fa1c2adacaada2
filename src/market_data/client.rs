// Connection state machine; no I/O, callbacks return the actions the host runs

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::market_data::feed::{parse_tick, subscribe_message};
use crate::market_data::quote::{FeedSnapshot, Quote};
use crate::telemetry;

pub const DEFAULT_ENDPOINT: &str = "ws://stream.tradingeconomics.com/?client=guest:guest";
pub const DEFAULT_INSTRUMENT: &str = "EURUSD:CUR";
pub const RECONNECT_DELAY: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub endpoint: String,
    pub instrument: String,
    pub reconnect_delay: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            instrument: DEFAULT_INSTRUMENT.to_string(),
            reconnect_delay: RECONNECT_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Subscribed,
    Closed,
    Errored,
    Disposed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    OpenTransport { url: String },
    Send(String),
    ArmReconnectTimer(Duration),
    CancelReconnectTimer,
    CloseTransport,
    Publish(FeedSnapshot),
}

#[derive(Debug)]
pub struct StreamClient {
    config: StreamConfig,
    state: ConnectionState,
    quote: Option<Quote>,
    // at most one pending reconnect
    timer_armed: bool,
    // a transport handle exists (handshaking or open)
    transport_live: bool,
}

impl StreamClient {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Idle,
            quote: None,
            timer_armed: false,
            transport_live: false,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn connected(&self) -> bool {
        self.state == ConnectionState::Subscribed
    }

    pub fn quote(&self) -> Option<&Quote> {
        self.quote.as_ref()
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot { quote: self.quote.clone(), connected: self.connected() }
    }

    /// Start connecting. Only the first call out of `Idle` does anything.
    pub fn activate(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Idle {
            debug!(state = ?self.state, "activate ignored");
            return Vec::new();
        }
        vec![self.begin_connect()]
    }

    pub fn on_transport_open(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Connecting {
            debug!(state = ?self.state, "open ignored");
            return Vec::new();
        }
        self.state = ConnectionState::Subscribed;
        metrics::gauge!(telemetry::CONNECTED_GAUGE).set(1.0);
        info!(instrument = %self.config.instrument, "feed connected, subscribing");
        vec![
            Action::Send(subscribe_message(&self.config.instrument)),
            Action::Publish(self.snapshot()),
        ]
    }

    /// Accept a quote if `raw` carries both `price` and `dt`; anything else is dropped.
    pub fn on_transport_message(&mut self, raw: &str) -> Vec<Action> {
        if self.state != ConnectionState::Subscribed {
            debug!(state = ?self.state, "message ignored");
            return Vec::new();
        }
        match parse_tick(raw) {
            Ok(quote) => {
                debug!(price = %quote.price(), observed_at = %quote.observed_at(), "quote accepted");
                metrics::counter!(telemetry::QUOTES_ACCEPTED).increment(1);
                self.quote = Some(quote);
                vec![Action::Publish(self.snapshot())]
            }
            Err(e) => {
                debug!(error = %e, bytes = raw.len(), "message dropped");
                metrics::counter!(telemetry::PARSE_FAILURES).increment(1);
                Vec::new()
            }
        }
    }

    pub fn on_transport_close(&mut self) -> Vec<Action> {
        self.lose_transport(ConnectionState::Closed)
    }

    pub fn on_transport_error(&mut self) -> Vec<Action> {
        self.lose_transport(ConnectionState::Errored)
    }

    /// Stale firings are ignored.
    pub fn on_reconnect_timer(&mut self) -> Vec<Action> {
        let waiting = matches!(self.state, ConnectionState::Closed | ConnectionState::Errored);
        if !waiting || !self.timer_armed {
            debug!(state = ?self.state, "reconnect timer ignored");
            return Vec::new();
        }
        self.timer_armed = false;
        info!("reconnecting");
        vec![self.begin_connect()]
    }

    /// Tear down. Safe from any state; later calls are no-ops.
    pub fn dispose(&mut self) -> Vec<Action> {
        if self.state == ConnectionState::Disposed {
            return Vec::new();
        }
        let was_connected = self.connected();
        let mut actions = Vec::new();
        if self.timer_armed {
            actions.push(Action::CancelReconnectTimer);
        }
        if self.transport_live {
            actions.push(Action::CloseTransport);
        }
        self.state = ConnectionState::Disposed;
        self.timer_armed = false;
        self.transport_live = false;
        if was_connected {
            metrics::gauge!(telemetry::CONNECTED_GAUGE).set(0.0);
            actions.push(Action::Publish(self.snapshot()));
        }
        info!("stream client disposed");
        actions
    }

    fn begin_connect(&mut self) -> Action {
        self.state = ConnectionState::Connecting;
        self.transport_live = true;
        metrics::counter!(telemetry::CONNECT_ATTEMPTS).increment(1);
        Action::OpenTransport { url: self.config.endpoint.clone() }
    }

    // Close and error share one path. A second signal for the same loss (error then
    // close) finds the timer already armed and does nothing.
    fn lose_transport(&mut self, next: ConnectionState) -> Vec<Action> {
        let was_connected = match self.state {
            ConnectionState::Connecting => false,
            ConnectionState::Subscribed => true,
            _ => {
                debug!(state = ?self.state, signal = ?next, "transport signal ignored");
                return Vec::new();
            }
        };
        let mut actions = Vec::new();
        if next == ConnectionState::Errored && was_connected {
            actions.push(Action::CloseTransport);
        }
        self.state = next;
        self.transport_live = false;
        self.timer_armed = true;
        metrics::gauge!(telemetry::CONNECTED_GAUGE).set(0.0);
        metrics::counter!(telemetry::RECONNECTS_SCHEDULED).increment(1);
        warn!(
            state = ?next,
            delay_ms = self.config.reconnect_delay.as_millis() as u64,
            "feed lost, reconnect scheduled"
        );
        if was_connected {
            actions.push(Action::Publish(self.snapshot()));
        }
        actions.push(Action::ArmReconnectTimer(self.config.reconnect_delay));
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK_A: &str = r#"{"price":"1.08456","dt":"2023-12-16T10:30:00Z"}"#;
    const TICK_B: &str = r#"{"price":"1.084567891","dt":"2023-12-16T10:30:00Z"}"#;

    fn subscribed() -> StreamClient {
        let mut client = StreamClient::new(StreamConfig::default());
        client.activate();
        client.on_transport_open();
        client
    }

    fn count(actions: &[Action], pred: impl Fn(&Action) -> bool) -> usize {
        actions.iter().filter(|a| pred(a)).count()
    }

    #[test]
    fn test_activate_opens_once() {
        let mut client = StreamClient::new(StreamConfig::default());
        assert_eq!(client.state(), ConnectionState::Idle);
        let actions = client.activate();
        assert_eq!(actions, vec![Action::OpenTransport { url: DEFAULT_ENDPOINT.to_string() }]);
        assert_eq!(client.state(), ConnectionState::Connecting);
        assert!(!client.connected());
        assert!(client.activate().is_empty());
    }

    #[test]
    fn test_open_sends_subscription_once() {
        let mut client = StreamClient::new(StreamConfig::default());
        client.activate();
        let actions = client.on_transport_open();
        assert_eq!(actions[0], Action::Send(subscribe_message(DEFAULT_INSTRUMENT)));
        assert_eq!(count(&actions, |a| matches!(a, Action::Send(_))), 1);
        assert!(client.connected());
        assert_eq!(client.state(), ConnectionState::Subscribed);
        // duplicate open signal must not resubscribe
        assert!(client.on_transport_open().is_empty());
    }

    #[test]
    fn test_valid_message_updates_quote() {
        let mut client = subscribed();
        let actions = client.on_transport_message(TICK_A);
        assert_eq!(actions.len(), 1);
        let snapshot = client.snapshot();
        assert_eq!(snapshot.price().as_deref(), Some("1.08456"));
        assert!(snapshot.observed_at().is_some_and(|s| !s.is_empty()));
        assert!(snapshot.connected);
        assert_eq!(actions[0], Action::Publish(snapshot));
    }

    #[test]
    fn test_long_price_rounds() {
        let mut client = subscribed();
        client.on_transport_message(TICK_B);
        assert_eq!(client.snapshot().price().as_deref(), Some("1.08457"));
    }

    #[test]
    fn test_missing_price_leaves_quote_empty() {
        let mut client = subscribed();
        assert!(client.on_transport_message(r#"{"dt":"2023-12-16T10:30:00Z"}"#).is_empty());
        assert!(client.quote().is_none());
        assert!(client.connected());
    }

    #[test]
    fn test_partial_message_keeps_previous_quote() {
        let mut client = subscribed();
        client.on_transport_message(TICK_A);
        let before = client.snapshot();
        assert!(client.on_transport_message(r#"{"price":"1.2"}"#).is_empty());
        assert!(client.on_transport_message(r#"{"dt":"2024-01-01T00:00:00Z"}"#).is_empty());
        assert_eq!(client.snapshot(), before);
    }

    #[test]
    fn test_malformed_text_changes_nothing() {
        let mut client = subscribed();
        let before = client.snapshot();
        assert!(client.on_transport_message("invalid json").is_empty());
        assert!(client.on_transport_message("").is_empty());
        assert_eq!(client.snapshot(), before);
        assert_eq!(client.state(), ConnectionState::Subscribed);
    }

    #[test]
    fn test_message_before_open_ignored() {
        let mut client = StreamClient::new(StreamConfig::default());
        client.activate();
        assert!(client.on_transport_message(TICK_A).is_empty());
        assert!(client.quote().is_none());
    }

    #[test]
    fn test_close_schedules_one_reconnect() {
        let mut client = subscribed();
        let actions = client.on_transport_close();
        assert!(!client.connected());
        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(actions.last(), Some(&Action::ArmReconnectTimer(RECONNECT_DELAY)));
        assert_eq!(count(&actions, |a| matches!(a, Action::ArmReconnectTimer(_))), 1);
        assert_eq!(count(&actions, |a| matches!(a, Action::Publish(s) if !s.connected)), 1);
        // a trailing error for the same loss arms nothing more
        assert!(client.on_transport_error().is_empty());
        assert!(client.on_transport_close().is_empty());
    }

    #[test]
    fn test_error_while_subscribed_closes_transport() {
        let mut client = subscribed();
        let actions = client.on_transport_error();
        assert_eq!(actions[0], Action::CloseTransport);
        assert_eq!(client.state(), ConnectionState::Errored);
        assert_eq!(count(&actions, |a| matches!(a, Action::ArmReconnectTimer(_))), 1);
    }

    #[test]
    fn test_handshake_failure_retries() {
        let mut client = StreamClient::new(StreamConfig::default());
        client.activate();
        let actions = client.on_transport_error();
        assert_eq!(actions, vec![Action::ArmReconnectTimer(RECONNECT_DELAY)]);
        assert_eq!(client.state(), ConnectionState::Errored);

        let actions = client.on_reconnect_timer();
        assert_eq!(actions, vec![Action::OpenTransport { url: DEFAULT_ENDPOINT.to_string() }]);
        assert_eq!(client.state(), ConnectionState::Connecting);
        // the same timer cannot fire twice
        assert!(client.on_reconnect_timer().is_empty());
    }

    #[test]
    fn test_reconnect_resubscribes_and_keeps_quote() {
        let mut client = subscribed();
        client.on_transport_message(TICK_A);
        client.on_transport_close();
        assert_eq!(client.snapshot().price().as_deref(), Some("1.08456"));

        client.on_reconnect_timer();
        let actions = client.on_transport_open();
        assert_eq!(count(&actions, |a| matches!(a, Action::Send(_))), 1);
        assert!(client.connected());
        assert_eq!(client.snapshot().price().as_deref(), Some("1.08456"));
    }

    #[test]
    fn test_custom_delay_used() {
        let config = StreamConfig { reconnect_delay: Duration::from_millis(250), ..StreamConfig::default() };
        let mut client = StreamClient::new(config);
        client.activate();
        assert_eq!(client.on_transport_close(), vec![Action::ArmReconnectTimer(Duration::from_millis(250))]);
    }

    #[test]
    fn test_dispose_cancels_pending_timer() {
        let mut client = subscribed();
        client.on_transport_close();
        let actions = client.dispose();
        assert_eq!(actions, vec![Action::CancelReconnectTimer]);
        assert_eq!(client.state(), ConnectionState::Disposed);
        assert!(client.on_reconnect_timer().is_empty());
    }

    #[test]
    fn test_dispose_closes_open_transport() {
        let mut client = subscribed();
        let actions = client.dispose();
        assert_eq!(actions[0], Action::CloseTransport);
        assert_eq!(count(&actions, |a| matches!(a, Action::Publish(s) if !s.connected)), 1);
        assert!(!client.connected());
    }

    #[test]
    fn test_dispose_while_connecting_drops_attempt() {
        let mut client = StreamClient::new(StreamConfig::default());
        client.activate();
        assert_eq!(client.dispose(), vec![Action::CloseTransport]);
    }

    #[test]
    fn test_dispose_idempotent() {
        let mut client = subscribed();
        assert!(!client.dispose().is_empty());
        assert!(client.dispose().is_empty());
        assert_eq!(client.state(), ConnectionState::Disposed);
    }

    #[test]
    fn test_dispose_from_idle() {
        let mut client = StreamClient::new(StreamConfig::default());
        assert!(client.dispose().is_empty());
        assert!(client.activate().is_empty());
    }

    #[test]
    fn test_late_callbacks_after_dispose_ignored() {
        let mut client = StreamClient::new(StreamConfig::default());
        client.activate();
        client.dispose();
        assert!(client.on_transport_open().is_empty());
        assert!(client.on_transport_message(TICK_A).is_empty());
        assert!(client.on_transport_close().is_empty());
        assert!(client.on_transport_error().is_empty());
        assert!(client.on_reconnect_timer().is_empty());
        assert_eq!(client.state(), ConnectionState::Disposed);
        assert!(client.quote().is_none());
    }
}
