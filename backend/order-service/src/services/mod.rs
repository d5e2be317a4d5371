pub mod orders;

pub use orders::{ApplyError, ConfirmationOutcome, OrderService};
