mod config;
pub mod data;
mod filler;
pub mod prompts;
mod trace;

pub use config::{init_default_config, FillConfig};
pub use data::{CompanyProfile, FillData, TenderInfo};
pub use filler::{
    consolidate_template, BatchItem, BatchJob, FillMode, FillReport, RoundReport, TemplateFiller,
};
pub use trace::TraceWriter;
