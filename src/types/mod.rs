/// Fixed-point helpers and conversions shared by quoting and oracle code
pub mod conversions;

pub use conversions::{mul_div, mul_div_up, BPS, PIPS};
