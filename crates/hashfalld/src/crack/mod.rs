//! Password cracking on top of the large-message transport.

pub mod charset;
pub mod hash;
pub mod master;
pub mod messages;
pub mod person;
pub mod worker;

pub use master::{Master, Recovered};
pub use messages::register_all;
pub use person::{load_persons, Person};
pub use worker::Worker;
