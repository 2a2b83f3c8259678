// Transport module
// Upstream protocol clients shared by the fetchers
//
// Numan Thabit 2025 Nov

pub mod http;

pub use http::JsonHttp;
