pub mod cache;
pub mod config;
pub mod debounce;
pub mod error;
pub mod normalize;
pub mod output;
pub mod period;
pub mod prefs;
pub mod rpc;
pub mod staleness;
pub mod sync;
pub mod view;
