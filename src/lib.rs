// Public modules for library use
pub mod models;
pub mod scrapers;
pub mod errors;

// Kept public for the binary; internal in library use
#[doc(hidden)]
pub mod config;
#[doc(hidden)]
pub mod services;
#[doc(hidden)]
pub mod store;
#[doc(hidden)]
pub mod util;

// Re-export the common types
pub use models::market::{DailyRecord, PriceBar, ShortSaleRecord, SymbolProfile, SymbolSeries};
pub use scrapers::base::PriceScraper;
pub use errors::{Result, ShortvolError};
