pub mod classify;
pub mod config;
pub mod correlate;
pub mod export;
pub mod feed;
pub mod logging;
pub mod normalize;
pub mod observe;
pub mod store;
