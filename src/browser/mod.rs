#[cfg(feature = "chrome")]
pub mod chrome;
pub mod navigation;

#[cfg(feature = "chrome")]
pub use chrome::{ChromeBrowser, ChromePage};
pub use navigation::{NavigationManager, NavigationResult};
