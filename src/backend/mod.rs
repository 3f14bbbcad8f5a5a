// Backend process boundary — discovery, supervision, and the control API.

pub mod client;
pub mod locate;
pub mod supervisor;
