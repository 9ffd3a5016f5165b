//! Wire protocol: typed objects and frame codec.

mod frame;
mod object;

pub use frame::{generate_seq_no, Command, Frame, MAX_ENTRY_LENGTH};
pub use object::{ObjectType, PayloadObject, RoutingObject};
