pub mod browser;
pub mod cli;
pub mod crawler;
pub mod delivery;
pub mod utils;
