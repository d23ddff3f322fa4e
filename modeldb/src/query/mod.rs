// Query engine - filters, updates, sorting, projection and aggregation
// over JSON documents

mod filter;
mod pipeline;
mod projection;
mod sort;
mod update;

pub use filter::{compare_values, values_equal, Condition, Filter};
pub use pipeline::run_pipeline;
pub use projection::{project, Projection};
pub use sort::{Sort, SortDirection};
pub use update::Update;
