//! In-memory event recording for logging assertions
//!
//! `init_test_capture()` installs one process-global subscriber. Every test
//! in the binary writes into the same buffer, so assertions go through
//! [`TestCapture::for_packet`], which keeps only the events of one packet
//! run, or filter on an `op` name no other test uses.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use ucp_core_types::schema::EVENT_END_ERROR;

/// One recorded event
///
/// The fields the lifecycle macros and the interpreter always attach are
/// lifted out; everything (those included) stays in `fields` as text.
#[derive(Clone, Debug)]
pub struct CapturedEvent {
    pub level: Level,
    pub op: Option<String>,
    pub event: Option<String>,
    pub packet_id: Option<String>,
    pub node_path: Option<String>,
    pub error_code: Option<String>,
    pub fields: HashMap<String, String>,
}

impl CapturedEvent {
    fn from_fields(level: Level, fields: HashMap<String, String>) -> Self {
        let take = |name: &str| fields.get(name).cloned();
        Self {
            level,
            op: take("op"),
            event: take("event"),
            packet_id: take("packet_id"),
            node_path: take("node_path"),
            error_code: take("err.code"),
            fields,
        }
    }

    pub fn is(&self, op: &str, event: &str) -> bool {
        self.op.as_deref() == Some(op) && self.event.as_deref() == Some(event)
    }
}

#[derive(Default)]
struct Fields(HashMap<String, String>);

impl Visit for Fields {
    // Display (`%`) and Debug (`?`) values both arrive here already formatted
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{:?}", value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }
}

struct Recorder {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl<S> Layer<S> for Recorder
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = Fields::default();
        event.record(&mut fields);
        let captured = CapturedEvent::from_fields(*event.metadata().level(), fields.0);
        if let Ok(mut events) = self.events.lock() {
            events.push(captured);
        }
    }
}

/// Handle on the shared event buffer
#[derive(Clone)]
pub struct TestCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl TestCapture {
    /// Snapshot of everything recorded so far, in emission order
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Events tagged with `packet_id`
    pub fn for_packet(&self, packet_id: &str) -> PacketEvents {
        PacketEvents(
            self.events()
                .into_iter()
                .filter(|e| e.packet_id.as_deref() == Some(packet_id))
                .collect(),
        )
    }

    /// Number of `event`s recorded for `op`
    pub fn count(&self, op: &str, event: &str) -> usize {
        self.events().iter().filter(|e| e.is(op, event)).count()
    }
}

/// Events of one packet run
#[derive(Clone, Debug)]
pub struct PacketEvents(Vec<CapturedEvent>);

impl PacketEvents {
    pub fn events(&self) -> &[CapturedEvent] {
        &self.0
    }

    pub fn count(&self, op: &str, event: &str) -> usize {
        self.0.iter().filter(|e| e.is(op, event)).count()
    }

    /// `node_path` of each matching event, in emission order
    pub fn node_paths(&self, op: &str, event: &str) -> Vec<String> {
        self.0
            .iter()
            .filter(|e| e.is(op, event))
            .filter_map(|e| e.node_path.clone())
            .collect()
    }

    /// `(node_path, err.code)` of every failed node
    pub fn node_failures(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .filter(|e| e.is("execute_node", EVENT_END_ERROR))
            .filter_map(|e| Some((e.node_path.clone()?, e.error_code.clone()?)))
            .collect()
    }
}

static GLOBAL_CAPTURE: OnceLock<TestCapture> = OnceLock::new();

/// Install (once) and return the shared capture
///
/// ```
/// use ucp_core::logging_facility::test_capture::init_test_capture;
/// use ucp_core::log_op_start;
///
/// let capture = init_test_capture();
/// log_op_start!("validate_packet_doc", packet_id = "pkt-doc");
/// assert_eq!(capture.for_packet("pkt-doc").count("validate_packet_doc", "start"), 1);
/// ```
pub fn init_test_capture() -> TestCapture {
    GLOBAL_CAPTURE
        .get_or_init(|| {
            let events = Arc::new(Mutex::new(Vec::new()));
            let recorder = Recorder {
                events: events.clone(),
            };
            let _ = tracing_subscriber::registry().with(recorder).try_init();
            TestCapture { events }
        })
        .clone()
}
