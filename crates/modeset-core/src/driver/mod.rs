//! Raw driver-side descriptors.
//!
//! Everything here mirrors what the display driver reports, ids and bit
//! orders included.  Nothing is interpreted until it reaches
//! [`crate::domain::inventory`].

pub mod descriptors;
