//! Terminal rendering for the channel viewer: viewport model, braille trace
//! grid and sidebar.

pub mod plot;
pub mod ui;
pub mod view;
