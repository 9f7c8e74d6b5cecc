pub use bumpalo;

pub mod descriptor;
pub mod il;
pub mod marshal;
pub mod tokens;
pub mod types;
