//! EEG-Core: session state, device seam and file output for the EEG recorder
//!
//! Everything in this crate is synchronous and free of GUI or runtime
//! dependencies; the desktop crate drives it from its event loop.

pub mod config;
pub mod device;
pub mod error;
pub mod persistence;
pub mod sample;
pub mod segment;
pub mod session;
pub mod state;
pub mod stopwatch;

pub use config::*;
pub use device::*;
pub use error::{RecorderError, RecorderResult};
pub use persistence::*;
pub use sample::*;
pub use segment::*;
pub use session::Session;
pub use state::*;
pub use stopwatch::*;
