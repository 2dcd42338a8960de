pub mod layout;
pub mod value;
