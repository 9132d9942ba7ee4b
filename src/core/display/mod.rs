//! Display Management
//!
//! Logical displays derived from screens and their groups.

pub mod controller;
pub mod display;

pub use controller::AbstractDisplayController;
pub use display::{
    AbstractDisplay, DisplayInfo, DisplayStateChangeListener, DisplayStateChangeType, FreezeFlag,
};

#[cfg(test)]
pub mod tests;
