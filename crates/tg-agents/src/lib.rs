pub mod approval;
pub mod catalog;
pub mod generator;
pub mod oracle;
pub mod registry;
