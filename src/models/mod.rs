pub mod bs;
pub mod merton;
