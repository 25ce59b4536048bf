//! Git hosting and local git access.

pub mod cli;
pub mod github;

pub use cli::GitCli;
pub use github::GitHubClient;
