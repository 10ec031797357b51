//! Cross-cutting utilities: time sources and ISO-8601 handling.

pub mod clock;

pub use clock::{Clock, SimClock, SystemClock, TimeService};
