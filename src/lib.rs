#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// #![warn(clippy::cargo)]

pub mod aggregate;
pub mod calibration;
pub mod channel;
pub mod config;
pub mod curve;
pub mod error;
pub mod hydro;
pub mod math;
pub mod pipeline;
pub mod polyfit;
pub mod report;
pub mod run;

pub use error::Error;

pub type Result<T> = ::std::result::Result<T, Error>;
