pub mod expander;
pub mod field_sync;
pub mod parser;
pub mod service;
pub mod template;

pub use expander::DbFieldCatalog;
pub use field_sync::FieldSyncService;
pub use service::GeneratorService;
pub use template::TemplateStore;
