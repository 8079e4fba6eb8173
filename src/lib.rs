//! Docker Hub repository maintenance: listing, describing and deleting
//! repositories, truncating old or matching tags and renewing images.

pub mod cli;
pub mod client;
pub mod fanout;
pub mod filter;
pub mod renew;
pub mod runtime;
pub mod style;
pub mod truncate;
pub mod types;

pub use client::{Client, Config, Registry, RegistryError};
pub use fanout::FanOut;
pub use filter::TagFilter;
pub use types::{Image, Page, Repository, Tag};
