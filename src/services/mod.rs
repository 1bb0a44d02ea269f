//! Services
//!
//! Engine logic. The generation engine drives a run; the other services
//! are the pieces it consults along the way.

pub mod budget;
pub mod event_bus;
pub mod framework_resolution;
pub mod generation;
pub mod research;
pub mod web;

#[cfg(test)]
pub(crate) mod test_support;

pub use budget::{BudgetController, Complexity, Stage, TimeBudget, TimeoutStatus};
pub use event_bus::{EventBus, EventStream};
pub use framework_resolution::{FrameworkResolver, Resolution};
pub use generation::{EngineDeps, GenerationEngine};
pub use research::{ResearchDispatcher, SubagentRequest, SubagentResponse, SubagentStatus};
pub use web::{CrawledPage, Crawler, HttpCrawler, SearchResult, TavilySearch, WebSearch};
