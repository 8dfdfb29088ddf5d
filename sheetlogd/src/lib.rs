pub mod daemon;
pub mod http;
pub mod storage;
pub mod sync;
pub mod token_provider;
