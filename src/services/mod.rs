pub mod catalog;
pub mod exclusions;
pub mod generator;
pub mod resolver;
pub mod session;
pub mod signals;
