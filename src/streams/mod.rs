//! Stream read paths: guest vs operator visibility

pub mod gate;

pub use gate::{PollHandle, VisibilityGate};
