pub mod javascript;
pub mod screenshot;

pub use screenshot::{png_dimensions, to_base64};
