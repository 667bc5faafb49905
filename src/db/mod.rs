pub mod keys;
pub mod scripts;

pub use keys::drop_keys_if_exist;
pub use scripts::{ScriptLocator, SearchPathLocator};
