//! Domain layer: entities, their state machines and the ports they are stored through.
//!
//! Everything here is synchronous and side-effect free; time is passed in and
//! persistence happens in the application layer.

pub mod audit;
pub mod commitment;
pub mod events;
pub mod identity;
pub mod money;
pub mod ports;
pub mod session;
pub mod teaching_request;
