pub mod session;

pub use session::{LogSession, LogStats};
