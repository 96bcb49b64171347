pub mod fusion;
pub mod ideas;
pub mod pages;
