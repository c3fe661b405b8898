pub mod entities;
pub mod errors;
pub mod request_item;
pub mod value_objects;
