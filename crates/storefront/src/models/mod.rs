//! Row types exchanged with the hosted backend.
//!
//! These mirror the `profiles`, `orders` and `order_items` tables. Validation
//! happens before a row is built; the row types themselves are plain data.

mod order;
mod profile;

pub use order::{NewOrder, NewOrderItem, OrderRecord};
pub use profile::Profile;
