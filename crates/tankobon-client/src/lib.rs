//! Tankobon Client - HTTP clients for the remote metadata sources
//!
//! This crate provides the network side of the harvester:
//!
//! - [`anilist`] - AniList GraphQL catalog of manga series
//! - [`google_books`] - Google Books search for individual volumes
//! - [`images`] - cover and thumbnail downloads
//!
//! # Overview
//!
//! Each client implements one of the source ports from `tankobon-core`, so
//! the harvester never sees HTTP details. Request budgeting lives in the
//! core's rate governor; the clients only deal with per-response retry hints.

use std::time::Duration;

use tankobon_core::error::AppError;

pub mod anilist;
pub mod google_books;
pub mod images;

#[cfg(test)]
mod test_server;

pub use anilist::AniListClient;
pub use google_books::GoogleBooksClient;
pub use images::HttpImageFetcher;

pub(crate) const USER_AGENT: &str = concat!("Tankobon/", env!("CARGO_PKG_VERSION"));

/// Maps a transport-level reqwest failure onto the application error.
pub(crate) fn transport_error(err: reqwest::Error, timeout: Duration) -> AppError {
    if err.is_timeout() {
        AppError::Timeout(timeout.as_secs())
    } else if err.is_connect() {
        AppError::NetworkError(format!("Connection failed: {}", err))
    } else {
        AppError::ClientError(err.to_string())
    }
}

/// First 200 characters of a response body, for log and error context.
pub(crate) fn body_excerpt(body: &str) -> String {
    body.chars().take(200).collect()
}
