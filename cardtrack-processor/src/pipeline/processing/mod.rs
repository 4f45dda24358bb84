pub mod merge;
pub mod normalize;
pub mod resolve;
