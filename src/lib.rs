pub mod archive;
pub mod asset;
pub mod cache;
pub mod cleanup;
pub mod commands;
pub mod config;
pub mod download;
pub mod error;
pub mod http;
pub mod install;
pub mod manifest;
pub mod resolver;
pub mod runtime;
pub mod state;
