pub mod cart;
pub mod module;
pub mod shipping;
pub mod totals;
pub mod transaction;
