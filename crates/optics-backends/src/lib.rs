//! Poll backends: stdout, carbon line protocol, and the embedded
//! Prometheus/JSON scrape endpoints.

mod carbon;
mod scrape;
mod stdout;

pub use carbon::CarbonBackend;
pub use scrape::ScrapeState;
pub use stdout::StdoutBackend;
