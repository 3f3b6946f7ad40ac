pub mod alpha_repo;
pub mod data_field_repo;
pub mod filter;
pub mod queue_repo;
pub mod template_repo;

pub use alpha_repo::{AlphaPatch, AlphaRepository};
pub use data_field_repo::DataFieldRepository;
pub use filter::{CatalogFilter, FilterError};
pub use queue_repo::{EnqueueMode, QueueRepository};
pub use template_repo::TemplateRepository;
