pub mod analysis;
pub mod audit;
pub mod codec;
pub mod coerce;
pub mod config;
pub mod dedupe;
pub mod marker;
pub mod migrate;
pub mod normalize;
pub mod orchestrator;
pub mod paths;
pub mod restore;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod util;
pub mod value;
pub mod warn;
