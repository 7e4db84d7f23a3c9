pub mod directory;
pub mod invoke;
