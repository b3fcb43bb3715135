//! HTTP plumbing shared by the manifest loader, the resolvers and the downloader.

mod client;
mod retry;

pub use client::{HttpClient, mask_token};
pub use retry::{
    NonRetryableError, RetryPolicy, check_retryable, classify_error, classify_status, is_retryable,
};
