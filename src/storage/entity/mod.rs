pub mod alpha;
pub mod alpha_template;
pub mod data_field;
pub mod queue_item;

