//! Affinity: binding objects to threads and resolving calls against that binding.

pub mod anchor;
pub mod object;

pub use anchor::{Anchor, Connection, Delivery, Receiver};
pub use object::{Affine, BypassAffinity};
