//! Port allocation module

pub mod allocator;

pub use allocator::{OsPortProbe, PortAllocator, PortProbe, PortReservation};
