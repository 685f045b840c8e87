//! Web search: ranked provider tiers behind one trait, routed with fallback.

mod brave;
mod duckduckgo;
mod google;
pub mod provider;
pub mod router;

pub use brave::Brave;
pub use duckduckgo::DuckDuckGo;
pub use google::GoogleCse;
pub use provider::{ProviderError, SearchProvider, SearchResult};
pub use router::{RoutedSearch, SearchRouter};
