mod commission;
mod customer;
mod link;
mod program;
mod webhook;
mod workspace;

pub use commission::*;
pub use customer::*;
pub use link::*;
pub use program::*;
pub use webhook::*;
pub use workspace::*;
