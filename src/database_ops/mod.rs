pub mod fdc;
pub mod store;
