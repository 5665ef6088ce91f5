use biometrics::{Collector, Counter, Moments};

pub(crate) static HTTP_REQUESTS: Counter = Counter::new("palaver.http.requests");
pub(crate) static HTTP_REQUEST_ERRORS: Counter = Counter::new("palaver.http.request_errors");
pub(crate) static HTTP_REQUEST_DURATION: Moments =
    Moments::new("palaver.http.request_duration_seconds");

pub(crate) static FRAMES_SENT: Counter = Counter::new("palaver.protocol.frames_sent");
pub(crate) static FRAMES_RECEIVED: Counter = Counter::new("palaver.protocol.frames_received");
pub(crate) static MALFORMED_FRAMES: Counter = Counter::new("palaver.protocol.malformed_frames");
pub(crate) static UNKNOWN_EVENTS: Counter = Counter::new("palaver.protocol.unknown_events");
pub(crate) static REPLY_CHUNKS: Counter = Counter::new("palaver.protocol.reply_chunks");
pub(crate) static PROTOCOL_ERRORS: Counter = Counter::new("palaver.protocol.errors");

pub(crate) static CONNECTS: Counter = Counter::new("palaver.connection.connects");
pub(crate) static CONNECT_FAILURES: Counter = Counter::new("palaver.connection.connect_failures");
pub(crate) static RECONNECTS: Counter = Counter::new("palaver.connection.reconnects");
pub(crate) static RECONNECT_BACKOFF: Moments =
    Moments::new("palaver.connection.reconnect_backoff_seconds");

pub(crate) static HISTORY_LOADS: Counter = Counter::new("palaver.history.loads");
pub(crate) static HISTORY_LOAD_ERRORS: Counter = Counter::new("palaver.history.load_errors");
pub(crate) static HISTORY_LOADS_DISCARDED: Counter = Counter::new("palaver.history.discarded");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&HTTP_REQUESTS);
    collector.register_counter(&HTTP_REQUEST_ERRORS);
    collector.register_moments(&HTTP_REQUEST_DURATION);

    collector.register_counter(&FRAMES_SENT);
    collector.register_counter(&FRAMES_RECEIVED);
    collector.register_counter(&MALFORMED_FRAMES);
    collector.register_counter(&UNKNOWN_EVENTS);
    collector.register_counter(&REPLY_CHUNKS);
    collector.register_counter(&PROTOCOL_ERRORS);

    collector.register_counter(&CONNECTS);
    collector.register_counter(&CONNECT_FAILURES);
    collector.register_counter(&RECONNECTS);
    collector.register_moments(&RECONNECT_BACKOFF);

    collector.register_counter(&HISTORY_LOADS);
    collector.register_counter(&HISTORY_LOAD_ERRORS);
    collector.register_counter(&HISTORY_LOADS_DISCARDED);
}
