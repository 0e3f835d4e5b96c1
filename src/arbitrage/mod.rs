pub mod builder;
pub mod matcher;
pub mod types;

pub use builder::OpportunityBuilder;
pub use matcher::{FallbackPolicy, PairMatcher, PerpPerpMatch, PerpSpotMatch};
pub use types::{PerpPerpOpportunity, PerpSpotOpportunity};
