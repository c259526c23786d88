//! # Data
//!
//! $$
//! R_{t,i} = f\!\left(p_{t-1,i},\, p_{t,i}\right),\quad t \in \bigcap_i \mathcal D_i
//! $$
//!
//! Price series store: provider boundary, response cache, validation and alignment.

pub mod aligned;
pub mod cache;
pub mod provider;
pub mod series;
pub mod store;

pub use aligned::AlignedReturnMatrix;
pub use aligned::PriceHistory;
pub use cache::PriceCache;
pub use provider::InMemoryProvider;
pub use provider::PriceProvider;
pub use series::AssetSeries;
pub use series::PricePoint;
pub use store::PriceSeriesStore;
