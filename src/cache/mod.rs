//! Response caching.

mod chunked;

pub use chunked::{spawn_sweeper, ChunkedCache};
