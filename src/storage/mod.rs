// Storage layer (local disk)

pub mod uploads;

pub use uploads::*;
