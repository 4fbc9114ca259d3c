pub mod driver;
pub mod rating;
pub mod ride;
