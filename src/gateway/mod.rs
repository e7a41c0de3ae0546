//! Gateway wiring

mod builder;
mod metered;

pub use builder::{Vellum, VellumBuilder};
pub use metered::{GenerateError, MeteredGateway};
