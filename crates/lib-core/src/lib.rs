pub mod errors;
pub mod groups;
pub mod helpers;
pub mod pairs;
pub mod records;
pub mod stages;
