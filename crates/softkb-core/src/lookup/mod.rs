//! Bibliographic lookups over the web
//!
//! This module provides:
//! - A GET-only JSON web client behind the [`WebApi`] trait
//! - A SQLite cache of responses, negative ones included
//! - The biblio-glutton / Crossref fallback chain used to resolve references

mod biblio;
mod cache;
mod client;

pub use biblio::{BiblioQuery, BiblioResolver};
pub use cache::{SqliteLookupCache, cache_key};
pub use client::{ApiRequest, ApiResponse, CachedWebApi, ReqwestWebApi, WebApi};
