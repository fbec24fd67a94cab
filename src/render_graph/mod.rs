//! Render Graph System
//!
//! An ordered list of passes driven by a two-phase frame protocol. Every pass
//! prepares its GPU resources before any pass records commands, so decisions
//! such as "light culling is unavailable" are final for the whole frame.

pub mod frame;
pub mod graph;
pub mod pass;

pub use frame::*;
pub use graph::*;
pub use pass::*;
