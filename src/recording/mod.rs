pub mod buffered_log;
pub mod csv;
pub mod media;
pub mod wav;

pub use buffered_log::{generate_subject_id, BufferedLog, LogConfig};
pub use media::{MediaEvents, MediaKind, SaveTracker};
