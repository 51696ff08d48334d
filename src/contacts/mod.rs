//! Contact lists: loading, phone normalisation and list preparation.

pub mod greeting;
pub mod phone;
pub mod prepare;
mod source;

pub use prepare::{PrepareSummary, PreparedContact, prepare};
pub use source::{ContactList, ContactRecord};
