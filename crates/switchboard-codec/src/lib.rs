pub mod codecs;
pub mod coerce;
pub mod orchestrator;
pub mod profile;
pub mod schema;
pub mod sse;

pub use codecs::strip_internal_keys;
pub use coerce::{coerce_arguments, normalize_arguments, ToolSchemaMap};
pub use orchestrator::{Orchestrator, Prepared};
pub use profile::{CodecId, ConversionProfile};
pub use sse::{to_anthropic_events_from_openai, SseEvent};
