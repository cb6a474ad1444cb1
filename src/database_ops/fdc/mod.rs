//! USDA FoodData Central import: paginated `/foods/list` sweep into the
//! food / nutrient / food_nutrient tables.
pub mod client;
pub mod normalize;
pub mod run;
pub mod writer;

pub use client::{FdcClient, PageFetch, PageSource};
pub use normalize::{normalize, normalize_page, Skip, ValidRecord};
pub use run::{run, RunOptions, RunReport, RunState};
pub use writer::{write_batch, WriteCounts};
