pub mod args;
pub mod prompt;

pub use args::{Args, Backend};
pub use prompt::confirm;
