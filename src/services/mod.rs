pub mod providers;
pub mod recommendations;
