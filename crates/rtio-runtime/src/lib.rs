#![doc = "Real-time event scheduling core for the RTIO harness."]

pub mod abort;
pub mod channel;
pub mod compose;
pub mod controller;
pub mod gate;
pub mod routines;
pub mod session;
pub mod sim;

pub use abort::*;
pub use channel::*;
pub use compose::*;
pub use controller::*;
pub use gate::*;
pub use routines::*;
pub use session::*;
pub use sim::SimulatedController;
