pub mod body;
pub mod dispatch;
pub mod headers;
pub mod snapshot;

pub use body::finalize_body;
pub use dispatch::{idle_bounded_stream, StreamMode, Transport, UpstreamReply};
pub use headers::{build_headers, Credential};
pub use snapshot::{SnapshotEnvelope, SnapshotWriter};
