mod candidate;
mod interaction;
mod session;
mod title;
mod tmdb;

pub use candidate::*;
pub use interaction::*;
pub use session::*;
pub use title::*;
pub use tmdb::*;
