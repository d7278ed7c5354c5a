pub mod admin;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod feed;
pub mod refresh;
pub mod scheduler;
pub mod service;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
pub use feed::{Article, Category, NewsSource, RefreshTarget};
pub use service::{NewsService, NewsView};
