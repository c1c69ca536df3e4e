pub mod unit;
pub mod hold;

pub use unit::SellableUnit;
pub use hold::{Hold, HoldState};
