//! Concrete context sources.

mod competitor;
mod http;

pub use competitor::CompetitorRankCollector;
pub use http::HttpSourceCollector;
