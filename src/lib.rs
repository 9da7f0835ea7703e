//! Control a Behringer DEQ2496 over MIDI SysEx: switch screens, set the LCD
//! contrast, identify the unit and grab its display.

pub mod commands;
pub mod config;
pub mod display;
pub mod error;
pub mod midi;
pub mod protocol;
pub mod state;
