pub mod element;
pub mod processor;
pub mod state;

pub use element::{BoundingBox, DomElement};
pub use processor::DomProcessor;
pub use state::IndexedDom;
