// Output module for playdash

pub mod errors;
pub mod events;
pub mod terminal;
pub mod transcript;

pub use errors::*;
pub use events::*;
pub use terminal::*;
pub use transcript::{highlight, parse_recap, RecapLine};
