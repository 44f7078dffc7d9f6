//! External collaborators behind the core traits: the long-lived Chromium
//! runtime, the work-list/report HTTP clients, and the generic metadata
//! extractor.

pub mod browser;
pub mod meta;
pub mod worklist;

pub use browser::{BrowserOptions, ChromiumRuntime, TabContext};
pub use meta::{meta_registry, MetaTagExtractor};
pub use worklist::{build_client, HttpReportSink, HttpWorklistSource};
