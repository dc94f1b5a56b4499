#![forbid(unsafe_code)]

pub mod error;
pub mod grid;
pub mod hearts;
pub mod model;
pub mod overlay;
pub mod progression;
pub mod time;

pub use error::Error;
pub use time::Clock;
