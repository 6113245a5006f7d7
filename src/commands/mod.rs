pub mod cache;
pub mod config;
pub mod fingerprint;
pub mod load;
pub mod run;
pub mod runs;
pub mod status;
