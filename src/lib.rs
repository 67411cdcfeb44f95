//! Forum file archiver library.
//!
//! A service that polls forum sections for new threads, resolves the file
//! URLs embedded in each starter post, and re-hosts the bytes on a pool of
//! quota-limited storage accounts.

pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod hosts;
pub mod scraper;
pub mod storage;
pub mod util;
