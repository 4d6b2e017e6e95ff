pub mod names;
pub mod output;
pub mod tar;

pub use names::*;
pub use output::SizeConstraintBytesMut;
