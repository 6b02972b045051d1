//! Fetch callbacks
//!
//! The cache never talks to a backend itself. On a miss it hands the request
//! template and parameters to a [`Fetcher`] and stores whatever structured
//! value comes back. Template substitution is the fetcher's job.

mod http;

pub use http::{render_template, HttpFetcher};

use serde_json::Value;

use crate::error::FetchError;
use crate::key::Params;

/// Produces a structured payload for a request template and its parameters
pub trait Fetcher {
    fn fetch(&self, template: &str, params: &Params) -> Result<Value, FetchError>;
}

impl<F> Fetcher for F
where
    F: Fn(&str, &Params) -> Result<Value, FetchError>,
{
    fn fetch(&self, template: &str, params: &Params) -> Result<Value, FetchError> {
        self(template, params)
    }
}
